use std::sync::Arc;

use tracing::info;

use fecore_types::{BackendKind, Error, FunctionKind, Replica, StartupType};

use crate::factory::ReplicaFactory;
use crate::store::FunctionStore;

/// Outcome of resolving one invocation to a replica (SPEC_FULL.md §4.5).
pub struct Resolved {
    pub replica: Replica,
    pub startup_type: StartupType,
    pub backend_kind: BackendKind,
    /// The function the replica actually belongs to — for a hybrid
    /// invocation this is the underlying native/wasm sibling, not the
    /// hybrid's own name.
    pub served_by: String,
}

/// Per-invocation selection of backend and replica (SPEC_FULL.md §4.5).
pub struct Resolver {
    store: Arc<FunctionStore>,
    factory: Arc<ReplicaFactory>,
}

impl Resolver {
    pub fn new(store: Arc<FunctionStore>, factory: Arc<ReplicaFactory>) -> Self {
        Resolver { store, factory }
    }

    pub async fn resolve(
        &self,
        fname: &str,
        requested_startup: Option<StartupType>,
        _requested_backend: Option<BackendKind>,
    ) -> Result<Resolved, Error> {
        let f = self.store.get_deployed_function(fname).await?;
        let force_cold = requested_startup == Some(StartupType::Cold);

        match f.kind.clone() {
            FunctionKind::Native | FunctionKind::Wasm => {
                let kind = FunctionStore::backend_kind_of(&f).expect("leaf function has a kind");
                self.resolve_leaf(fname, kind, force_cold).await
            }
            FunctionKind::Hybrid { native, wasm } => {
                self.resolve_hybrid(fname, &native, &wasm, force_cold).await
            }
        }
    }

    async fn resolve_leaf(
        &self,
        fname: &str,
        kind: BackendKind,
        force_cold: bool,
    ) -> Result<Resolved, Error> {
        if !force_cold {
            if let Some(replica) = self.store.pop_idle_replica(fname).await {
                self.store.add_active_replica(fname, replica.clone()).await;
                return Ok(Resolved {
                    replica,
                    startup_type: StartupType::Warm,
                    backend_kind: kind,
                    served_by: fname.to_string(),
                });
            }
        }
        let replica = self.factory.create(fname, kind, true).await?;
        Ok(Resolved {
            replica,
            startup_type: StartupType::Cold,
            backend_kind: kind,
            served_by: fname.to_string(),
        })
    }

    async fn resolve_hybrid(
        &self,
        fname: &str,
        native_fn: &str,
        wasm_fn: &str,
        force_cold: bool,
    ) -> Result<Resolved, Error> {
        let policy = self.store.get_policy(fname).await?;
        let warm_kind = policy.warm_start_kind;
        let cold_kind = policy.cold_start_kind;
        let warm_fn = sibling_name(warm_kind, native_fn, wasm_fn);
        let cold_fn = sibling_name(cold_kind, native_fn, wasm_fn);

        if !force_cold {
            if let Some(replica) = self.store.pop_idle_replica(warm_fn).await {
                self.store.add_active_replica(warm_fn, replica.clone()).await;
                return Ok(Resolved {
                    replica,
                    startup_type: StartupType::Warm,
                    backend_kind: warm_kind,
                    served_by: warm_fn.to_string(),
                });
            }
        }

        let replica = self.factory.create(cold_fn, cold_kind, true).await?;

        if policy.spawn_extra > 0 {
            self.spawn_extra_warm(warm_fn, warm_kind, policy.spawn_extra);
        }

        Ok(Resolved {
            replica,
            startup_type: StartupType::Cold,
            backend_kind: cold_kind,
            served_by: cold_fn.to_string(),
        })
    }

    /// Fire-and-forget pre-warming of `count` idle replicas of the warm
    /// kind, per SPEC_FULL.md §4.5.
    fn spawn_extra_warm(&self, warm_fn: &str, kind: BackendKind, count: u32) {
        let factory = self.factory.clone();
        let warm_fn = warm_fn.to_string();
        tokio::spawn(async move {
            for _ in 0..count {
                if let Err(e) = factory.create(&warm_fn, kind, false).await {
                    info!(function = %warm_fn, error = %e, "spawn_extra pre-warm failed");
                    return;
                }
            }
        });
    }
}

fn sibling_name<'a>(kind: BackendKind, native_fn: &'a str, wasm_fn: &'a str) -> &'a str {
    match kind {
        BackendKind::Native => native_fn,
        BackendKind::Wasm => wasm_fn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SpawnedContainer;
    use async_trait::async_trait;
    use fecore_pool::{CapacityGuard, NetNsPool};
    use fecore_state::StateStore;
    use fecore_types::Function;
    use std::collections::HashMap;

    struct StubNative;
    #[async_trait]
    impl crate::drivers::NativeDriver for StubNative {
        async fn create_container(
            &self,
            _name: &str,
            _f: &Function,
        ) -> Result<SpawnedContainer, Error> {
            Ok(SpawnedContainer {
                pid: 1,
                ip: "127.0.0.1".to_string(),
            })
        }
        async fn remove_container(&self, _name: &str, _pid: u32) -> Result<(), Error> {
            Ok(())
        }
    }

    struct StubWasm;
    #[async_trait]
    impl crate::drivers::WasmDriver for StubWasm {
        async fn spawn(
            &self,
            _name: &str,
            _f: &Function,
            _ns_num: u32,
            _ip: &str,
        ) -> Result<u32, Error> {
            Ok(2)
        }
        async fn kill(&self, _pid: u32) -> Result<(), Error> {
            Ok(())
        }
    }

    fn make_function(name: &str, kind: FunctionKind) -> Function {
        Function {
            name: name.to_string(),
            namespace: "default".to_string(),
            image: "test/echo:1".to_string(),
            image_files: vec![],
            kind,
            labels: HashMap::new(),
            annotations: HashMap::new(),
            secrets: vec![],
            secrets_path: "/secrets".to_string(),
            env_vars: HashMap::new(),
            env_process: None,
            memory_limit: 0,
            policy: Function::default_policy(),
        }
    }

    async fn test_setup() -> (Arc<FunctionStore>, Resolver) {
        let store = Arc::new(FunctionStore::new(
            StateStore::open_in_memory().unwrap(),
            CapacityGuard::new(4, 4),
            NetNsPool::new(4),
        ));
        let factory = Arc::new(ReplicaFactory::new(
            store.clone(),
            Arc::new(StubNative),
            Arc::new(StubWasm),
        ));
        let resolver = Resolver::new(store.clone(), factory);
        (store, resolver)
    }

    #[tokio::test]
    async fn leaf_cold_then_warm_reuse() {
        let (store, resolver) = test_setup().await;
        store
            .add_deployed_function(make_function("echo", FunctionKind::Native))
            .await
            .unwrap();

        let first = resolver.resolve("echo", None, None).await.unwrap();
        assert_eq!(first.startup_type, StartupType::Cold);
        store
            .return_replica_to_idle("echo", &first.replica.uuid)
            .await
            .unwrap();

        let second = resolver.resolve("echo", None, None).await.unwrap();
        assert_eq!(second.startup_type, StartupType::Warm);
        assert_eq!(second.replica.uuid, first.replica.uuid);
    }

    #[tokio::test]
    async fn forced_cold_skips_idle_pool() {
        let (store, resolver) = test_setup().await;
        store
            .add_deployed_function(make_function("echo", FunctionKind::Native))
            .await
            .unwrap();

        let first = resolver.resolve("echo", None, None).await.unwrap();
        store
            .return_replica_to_idle("echo", &first.replica.uuid)
            .await
            .unwrap();

        let second = resolver
            .resolve("echo", Some(StartupType::Cold), None)
            .await
            .unwrap();
        assert_eq!(second.startup_type, StartupType::Cold);
        assert_ne!(second.replica.uuid, first.replica.uuid);
    }

    #[tokio::test]
    async fn hybrid_cold_uses_policy_cold_kind() {
        let (store, resolver) = test_setup().await;
        store
            .add_deployed_function(make_function("compress-n", FunctionKind::Native))
            .await
            .unwrap();
        store
            .add_deployed_function(make_function("compress-w", FunctionKind::Wasm))
            .await
            .unwrap();
        store
            .add_deployed_function(make_function(
                "compress",
                FunctionKind::Hybrid {
                    native: "compress-n".to_string(),
                    wasm: "compress-w".to_string(),
                },
            ))
            .await
            .unwrap();

        let resolved = resolver.resolve("compress", None, None).await.unwrap();
        // default policy: cold_start_kind = wasm
        assert_eq!(resolved.backend_kind, BackendKind::Wasm);
        assert_eq!(resolved.served_by, "compress-w");
        assert_eq!(resolved.startup_type, StartupType::Cold);
    }

    #[tokio::test]
    async fn hybrid_warm_hit_uses_warm_kind_pool() {
        let (store, resolver) = test_setup().await;
        store
            .add_deployed_function(make_function("compress-n", FunctionKind::Native))
            .await
            .unwrap();
        store
            .add_deployed_function(make_function("compress-w", FunctionKind::Wasm))
            .await
            .unwrap();
        store
            .add_deployed_function(make_function(
                "compress",
                FunctionKind::Hybrid {
                    native: "compress-n".to_string(),
                    wasm: "compress-w".to_string(),
                },
            ))
            .await
            .unwrap();

        // default policy: warm_start_kind = native. Seed an idle native replica.
        let seeded = Replica {
            uuid: "compress-n_seed_n".to_string(),
            fname: "compress-n".to_string(),
            backend: BackendKind::Native,
            pid: 1,
            ip: "127.0.0.1".to_string(),
            netns: None,
            last_access: 0,
        };
        store.add_idle_replica("compress-n", seeded).await;

        let resolved = resolver.resolve("compress", None, None).await.unwrap();
        assert_eq!(resolved.startup_type, StartupType::Warm);
        assert_eq!(resolved.backend_kind, BackendKind::Native);
        assert_eq!(resolved.served_by, "compress-n");
    }
}
