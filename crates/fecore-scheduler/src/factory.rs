use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use fecore_types::{BackendKind, Error, Replica};

use crate::drivers::{NativeDriver, WasmDriver};
use crate::store::{now_ms, FunctionStore};

/// Creates and destroys replicas via the two backend drivers, enforcing
/// `CapacityGuard` (SPEC_FULL.md §4.6). The capacity counter is always
/// released, even on a failed create.
pub struct ReplicaFactory {
    store: Arc<FunctionStore>,
    native: Arc<dyn NativeDriver>,
    wasm: Arc<dyn WasmDriver>,
}

impl ReplicaFactory {
    pub fn new(
        store: Arc<FunctionStore>,
        native: Arc<dyn NativeDriver>,
        wasm: Arc<dyn WasmDriver>,
    ) -> Self {
        ReplicaFactory {
            store,
            native,
            wasm,
        }
    }

    /// Creates one replica of `kind` belonging to `fname`; inserts it into
    /// the active map if `set_active`, otherwise the idle pool.
    pub async fn create(
        &self,
        fname: &str,
        kind: BackendKind,
        set_active: bool,
    ) -> Result<Replica, Error> {
        if !self.store.capacity.acquire_blocking(kind).await {
            return Err(Error::CapacityExhausted {
                kind: kind.as_str(),
            });
        }

        let result = match kind {
            BackendKind::Native => self.create_native(fname).await,
            BackendKind::Wasm => self.create_wasm(fname).await,
        };

        let replica = match result {
            Ok(r) => r,
            Err(e) => {
                self.store.capacity.release(kind);
                return Err(e);
            }
        };

        if set_active {
            self.store.add_active_replica(fname, replica.clone()).await;
        } else {
            self.store.add_idle_replica(fname, replica.clone()).await;
        }
        Ok(replica)
    }

    async fn create_native(&self, fname: &str) -> Result<Replica, Error> {
        let f = self.store.get_deployed_function(fname).await?;
        let uuid = format!("{fname}_{}_n", short_uuid());
        let spawned = self.native.create_container(&uuid, &f).await?;
        Ok(Replica {
            uuid,
            fname: fname.to_string(),
            backend: BackendKind::Native,
            pid: spawned.pid,
            ip: spawned.ip,
            netns: None,
            last_access: now_ms(),
        })
    }

    async fn create_wasm(&self, fname: &str) -> Result<Replica, Error> {
        let (ns_num, ip) = self
            .store
            .netns
            .acquire()
            .await
            .ok_or(Error::NetNsExhausted)?;

        let f = self.store.get_deployed_function(fname).await;
        let f = match f {
            Ok(f) => f,
            Err(e) => {
                self.store.netns.release(ns_num, ip).await;
                return Err(e);
            }
        };

        let uuid = format!("{fname}_{}_w", short_uuid());
        let pid = match self.wasm.spawn(&uuid, &f, ns_num, &ip).await {
            Ok(pid) => pid,
            Err(e) => {
                self.store.netns.release(ns_num, ip).await;
                return Err(e);
            }
        };

        Ok(Replica {
            uuid,
            fname: fname.to_string(),
            backend: BackendKind::Wasm,
            pid,
            ip,
            netns: Some(ns_num),
            last_access: now_ms(),
        })
    }

    /// Best-effort teardown: errors at each step are logged but do not
    /// prevent subsequent steps; the capacity counter is always released
    /// (SPEC_FULL.md §4.6).
    pub async fn destroy(&self, r: &Replica) {
        match r.backend {
            BackendKind::Native => {
                if let Err(e) = self.native.remove_container(&r.uuid, r.pid).await {
                    warn!(replica = %r.uuid, error = %e, "native teardown failed");
                }
                self.store.capacity.release(BackendKind::Native);
            }
            BackendKind::Wasm => {
                if let Err(e) = self.wasm.kill(r.pid).await {
                    warn!(replica = %r.uuid, error = %e, "wasm teardown failed");
                }
                if let Some(ns_num) = r.netns {
                    self.store.netns.release(ns_num, r.ip.clone()).await;
                }
                self.store.capacity.release(BackendKind::Wasm);
            }
        }
        self.store.remove_container_row(&r.uuid).await;
    }
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}
