use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use fecore_pool::{CapacityGuard, IdlePool, NetNsPool};
use fecore_state::{ContainerRow, StateStore};
use fecore_types::{BackendKind, Error, Function, FunctionKind, FunctionStats, Policy, Replica};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The central registry (SPEC_FULL.md §4.4). Lock order, outer to inner:
/// `functions` → `policies` → `idle_pools` → `active` → `stats` →
/// capacity/netns. No operation here takes an outer lock while holding an
/// inner one.
pub struct FunctionStore {
    state: StateStore,
    pub capacity: std::sync::Arc<CapacityGuard>,
    pub netns: std::sync::Arc<NetNsPool>,
    functions: RwLock<HashMap<String, Function>>,
    policies: RwLock<HashMap<String, Mutex<Policy>>>,
    idle_pools: RwLock<HashMap<String, Mutex<IdlePool>>>,
    active: RwLock<HashMap<String, Mutex<HashMap<String, Replica>>>>,
    stats: RwLock<HashMap<String, Mutex<FunctionStats>>>,
}

impl FunctionStore {
    pub fn new(state: StateStore, capacity: CapacityGuard, netns: NetNsPool) -> Self {
        FunctionStore {
            state,
            capacity: std::sync::Arc::new(capacity),
            netns: std::sync::Arc::new(netns),
            functions: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            idle_pools: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// Reloads deployed functions and their last-known containers from the
    /// metadata store, reconstructing idle Replica entries. PID and backend
    /// kind are best-effort; startup does not verify liveness
    /// (SPEC_FULL.md §4.4, "Startup").
    pub async fn load_from_state(state: StateStore, capacity: CapacityGuard, netns: NetNsPool) -> Result<Self, Error> {
        let store = Self::new(state, capacity, netns);
        let functions = store.state.list_functions(None)?;
        for f in functions {
            store.register_function_locked(&f).await;
            let containers = store.state.list_containers_for_function(&f.name)?;
            for row in containers {
                let replica = Replica {
                    uuid: row.name.clone(),
                    fname: row.parent_function.clone(),
                    backend: row.backend,
                    pid: 0,
                    ip: row.ip.clone(),
                    netns: None,
                    last_access: now_ms(),
                };
                store.add_idle_replica(&row.parent_function, replica).await;
            }
        }
        Ok(store)
    }

    async fn register_function_locked(&self, f: &Function) {
        let policy = f.policy;
        self.functions
            .write()
            .await
            .insert(f.name.clone(), f.clone());
        self.policies
            .write()
            .await
            .insert(f.name.clone(), Mutex::new(policy));
        self.stats
            .write()
            .await
            .insert(f.name.clone(), Mutex::new(FunctionStats::default()));
        if matches!(f.kind, FunctionKind::Native | FunctionKind::Wasm) {
            self.idle_pools
                .write()
                .await
                .insert(f.name.clone(), Mutex::new(IdlePool::new()));
            self.active
                .write()
                .await
                .insert(f.name.clone(), Mutex::new(HashMap::new()));
        }
    }

    pub async fn add_deployed_function(&self, f: Function) -> Result<(), Error> {
        if self.state.get_function(&f.name)?.is_some() {
            return Err(Error::InvalidInput(format!(
                "function '{}' already exists",
                f.name
            )));
        }
        self.state.put_function(&f)?;
        self.register_function_locked(&f).await;
        debug!(function = %f.name, "deployed function");
        Ok(())
    }

    pub async fn remove_deployed_function(&self, name: &str) -> Result<(), Error> {
        if !self.state.remove_function(name)? {
            return Err(Error::NotFound(name.to_string()));
        }
        self.functions.write().await.remove(name);
        self.policies.write().await.remove(name);
        self.idle_pools.write().await.remove(name);
        self.active.write().await.remove(name);
        self.stats.write().await.remove(name);
        Ok(())
    }

    pub async fn get_deployed_function(&self, name: &str) -> Result<Function, Error> {
        let mut f = self
            .functions
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        f.policy = self.get_policy(name).await?;
        Ok(f)
    }

    pub async fn list_deployed_functions(&self, namespace: Option<&str>) -> Vec<Function> {
        self.functions
            .read()
            .await
            .values()
            .filter(|f| namespace.is_none_or(|ns| ns == f.namespace))
            .cloned()
            .collect()
    }

    pub async fn get_policy(&self, fname: &str) -> Result<Policy, Error> {
        let policies = self.policies.read().await;
        let lock = policies
            .get(fname)
            .ok_or_else(|| Error::NotFound(fname.to_string()))?;
        Ok(*lock.lock().await)
    }

    pub async fn with_policy_mut<F, R>(&self, fname: &str, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Policy) -> R,
    {
        let policies = self.policies.read().await;
        let lock = policies
            .get(fname)
            .ok_or_else(|| Error::NotFound(fname.to_string()))?;
        let mut policy = lock.lock().await;
        Ok(f(&mut policy))
    }

    pub async fn add_idle_replica(&self, fname: &str, r: Replica) {
        let pools = self.idle_pools.read().await;
        if let Some(pool) = pools.get(fname) {
            pool.lock().await.push(r.clone());
        } else {
            warn!(function = %fname, "add_idle_replica: no idle pool for function");
        }
        let stats = self.stats.read().await;
        if let Some(s) = stats.get(fname) {
            s.lock().await.idle_count += 1;
        }
        let _ = self
            .state
            .put_container(&ContainerRow {
                name: r.uuid,
                parent_function: fname.to_string(),
                backend: r.backend,
                ip: r.ip,
            });
    }

    pub async fn pop_idle_replica(&self, fname: &str) -> Option<Replica> {
        let pools = self.idle_pools.read().await;
        let popped = pools.get(fname)?.lock().await.pop()?;
        drop(pools);
        let stats = self.stats.read().await;
        if let Some(s) = stats.get(fname) {
            let mut s = s.lock().await;
            s.idle_count = s.idle_count.saturating_sub(1);
        }
        Some(popped)
    }

    pub async fn add_active_replica(&self, fname: &str, r: Replica) {
        let active = self.active.read().await;
        if let Some(m) = active.get(fname) {
            m.lock().await.insert(r.uuid.clone(), r);
        } else {
            warn!(function = %fname, "add_active_replica: no active map for function");
        }
        let stats = self.stats.read().await;
        if let Some(s) = stats.get(fname) {
            s.lock().await.active_count += 1;
        }
    }

    /// Moves a replica from active back to idle. Never called on client
    /// disconnect (SPEC_FULL.md §9, `ReplicaReturnOnClientDisconnect`).
    pub async fn return_replica_to_idle(&self, fname: &str, uuid: &str) -> Result<(), Error> {
        let r = {
            let active = self.active.read().await;
            let m = active
                .get(fname)
                .ok_or_else(|| Error::NotFound(fname.to_string()))?;
            m.lock()
                .await
                .remove(uuid)
                .ok_or_else(|| Error::NotFound(uuid.to_string()))?
        };
        let stats = self.stats.read().await;
        if let Some(s) = stats.get(fname) {
            let mut s = s.lock().await;
            s.active_count = s.active_count.saturating_sub(1);
        }
        drop(stats);
        self.add_idle_replica(fname, r).await;
        Ok(())
    }

    /// Pops every idle replica for `fname`, leaving active replicas to
    /// finish in place (SPEC_FULL.md §4.4). `pop()` alone can strand a lone
    /// LRU (§4.1), so a second pass through `evict_lru` clears anything left
    /// over — otherwise a deleted/updated function would leak that replica's
    /// capacity/netns slot forever.
    pub async fn drain_idle_replicas(&self, fname: &str) -> Vec<Replica> {
        let pools = self.idle_pools.read().await;
        let Some(pool) = pools.get(fname) else {
            return Vec::new();
        };
        let mut pool = pool.lock().await;
        let mut out = Vec::new();
        while let Some(r) = pool.pop() {
            out.push(r);
        }
        while let Some(r) = pool.evict_lru() {
            out.push(r);
        }
        out
    }

    pub async fn remove_container_row(&self, uuid: &str) {
        let _ = self.state.remove_container(uuid);
    }

    pub async fn stats_snapshot(&self, fname: &str) -> Result<FunctionStats, Error> {
        let stats = self.stats.read().await;
        let lock = stats
            .get(fname)
            .ok_or_else(|| Error::NotFound(fname.to_string()))?;
        Ok(lock.lock().await.clone())
    }

    pub async fn with_stats_mut<F, R>(&self, fname: &str, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut FunctionStats) -> R,
    {
        let stats = self.stats.read().await;
        let lock = stats
            .get(fname)
            .ok_or_else(|| Error::NotFound(fname.to_string()))?;
        let mut s = lock.lock().await;
        Ok(f(&mut s))
    }

    /// For EvictorDaemon: the set of leaf (native/wasm) function names that
    /// own an idle pool.
    pub async fn leaf_function_names(&self) -> Vec<String> {
        self.idle_pools.read().await.keys().cloned().collect()
    }

    pub async fn with_idle_pool_mut<F, R>(&self, fname: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut IdlePool) -> R,
    {
        let pools = self.idle_pools.read().await;
        let pool = pools.get(fname)?;
        let mut pool = pool.lock().await;
        Some(f(&mut pool))
    }

    pub fn backend_kind_of(f: &Function) -> Option<BackendKind> {
        match f.kind {
            FunctionKind::Native => Some(BackendKind::Native),
            FunctionKind::Wasm => Some(BackendKind::Wasm),
            FunctionKind::Hybrid { .. } => None,
        }
    }
}
