//! Single-consumer aggregator for invocation statistics (SPEC_FULL.md §4.8).
//!
//! The original groups the hybrid dual-recording logic into the producer
//! call (`UpdateFunctionStats`), which reconstructs the serving sibling's
//! name by splitting the request ID string. Here the caller already has a
//! strongly-typed `served_by` field from `Resolved` (fecore-scheduler), so
//! `submit` takes it directly instead of re-deriving it from a string.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use fecore_policy::PolicyController;
use fecore_scheduler::FunctionStore;
use fecore_types::{BackendKind, FunctionKind, FunctionStat, StartupType, STATS_WINDOW};

const CHANNEL_CAPACITY: usize = 4096;

/// Handle producers use to enqueue a completed invocation's stat. Cloneable;
/// cheap to hold one per request.
#[derive(Clone)]
pub struct StatsAggregator {
    sender: mpsc::Sender<FunctionStat>,
}

impl StatsAggregator {
    /// Spawns the single consumer task and returns a handle to submit stats.
    pub fn spawn(
        store: Arc<FunctionStore>,
        policy: Arc<PolicyController>,
        invocation_sample_threshold: u32,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run(store, policy, invocation_sample_threshold, rx));
        StatsAggregator { sender: tx }
    }

    /// Enqueues a completed invocation. Non-blocking — a full channel drops
    /// the stat and logs, per SPEC_FULL.md §4.7/§5 ("producers do not block
    /// on a full channel by design").
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &self,
        invoked_fname: &str,
        served_by: &str,
        backend_kind: BackendKind,
        startup_ms: i64,
        exec_ms: i64,
        startup_type: StartupType,
        is_hybrid: bool,
    ) {
        let entry = |fname: &str| FunctionStat {
            fname: fname.to_string(),
            ctr_type: backend_kind,
            startup_ms,
            exec_ms,
            startup_type,
        };

        if is_hybrid {
            self.try_send(entry(invoked_fname));
            self.try_send(entry(served_by));
        } else {
            self.try_send(entry(invoked_fname));
        }
    }

    fn try_send(&self, stat: FunctionStat) {
        if self.sender.try_send(stat).is_err() {
            warn!("stats channel full or closed; dropping stat");
        }
    }
}

async fn run(
    store: Arc<FunctionStore>,
    policy: Arc<PolicyController>,
    invocation_sample_threshold: u32,
    mut rx: mpsc::Receiver<FunctionStat>,
) {
    while let Some(stat) = rx.recv().await {
        if let Err(e) = process_one(&store, &policy, invocation_sample_threshold, stat).await {
            debug!(error = %e, "dropping stat for unknown function");
        }
    }
}

async fn process_one(
    store: &FunctionStore,
    policy: &PolicyController,
    invocation_sample_threshold: u32,
    stat: FunctionStat,
) -> Result<(), fecore_types::Error> {
    let fname = stat.fname.clone();
    let triggers = store
        .with_stats_mut(&fname, |s| {
            let entry_pos = s.entry_pos;
            s.curr_invocations += 1;

            if entry_pos == STATS_WINDOW - 1 {
                let mut sorted = s.service_times.clone();
                sorted.sort_unstable();
                s.p50_svc_time = sorted[STATS_WINDOW / 2 - 1];
                s.p99_svc_time = sorted[STATS_WINDOW - 2];
                s.total_svc_time = 0;
            }
            let cold_pos = s.cold_pos;
            let warm_pos = s.warm_pos;
            if cold_pos == STATS_WINDOW - 1 {
                s.total_svc_cold = 0;
            }
            if warm_pos == STATS_WINDOW - 1 {
                s.total_svc_warm = 0;
            }

            let svc_time = stat.startup_ms + stat.exec_ms;
            s.total_svc_time += svc_time;
            s.avg_svc_time = s.total_svc_time / (entry_pos as i64 + 1);

            s.total_invocations += 1;
            s.exec_times[entry_pos] = stat.exec_ms;
            s.startup_times[entry_pos] = stat.startup_ms;
            s.service_times[entry_pos] = svc_time;
            s.total_exec_time += stat.exec_ms;
            s.total_startup_time += stat.startup_ms;
            s.avg_exec_time = s.total_exec_time / s.total_invocations as i64;
            s.avg_startup_time = s.total_startup_time / s.total_invocations as i64;

            let mut cold_tick = false;
            let mut warm_tick = false;
            match stat.startup_type {
                StartupType::Cold => {
                    s.cold_starts += 1;
                    s.total_svc_cold = svc_time;
                    s.avg_svc_cold = s.total_svc_cold / (cold_pos as i64 + 1);
                    s.cold_pos = (cold_pos + 1) % STATS_WINDOW;
                    cold_tick = s.cold_pos % 10 == 0;
                }
                StartupType::Warm => {
                    s.warm_starts += 1;
                    s.total_svc_warm = svc_time;
                    s.avg_svc_warm = s.total_svc_warm / (warm_pos as i64 + 1);
                    s.warm_pos = (warm_pos + 1) % STATS_WINDOW;
                    warm_tick = s.warm_pos % 10 == 0;
                }
            }

            s.entries[entry_pos] = Some(stat.clone());
            s.entry_pos = (entry_pos + 1) % STATS_WINDOW;

            let mut sample_tick = None;
            if s.curr_invocations == invocation_sample_threshold {
                let cold_ratio = s.cold_starts as f32 / invocation_sample_threshold as f32;
                let warm_ratio = s.warm_starts as f32 / invocation_sample_threshold as f32;
                s.cold_ratio = cold_ratio;
                s.warm_ratio = warm_ratio;
                s.sandbox_util = if s.active_count + s.idle_count > 0 {
                    s.active_count as f32 / (s.active_count + s.idle_count) as f32
                } else {
                    0.0
                };
                sample_tick = Some((s.sandbox_util, cold_ratio));
                s.curr_invocations = 0;
                s.cold_starts = 0;
                s.warm_starts = 0;
            }

            (cold_tick, warm_tick, sample_tick)
        })
        .await?;

    let (cold_tick, warm_tick, sample_tick) = triggers;

    // These PolicyController calls only do anything for hybrid functions
    // (see PolicyController::hybrid_siblings); leaf functions' entries
    // simply accumulate stats for their sibling to be compared against.
    let f = store.get_deployed_function(&fname).await?;
    if matches!(f.kind, FunctionKind::Hybrid { .. }) {
        if cold_tick {
            let _ = policy.eval_cold_start(&fname).await;
        }
        if warm_tick {
            let _ = policy.eval_warm_start(&fname).await;
        }
        if let Some((utilization, cold_ratio)) = sample_tick {
            let _ = policy.eval_spawn_extra(&fname, utilization, cold_ratio).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fecore_pool::{CapacityGuard, NetNsPool};
    use fecore_state::StateStore;
    use fecore_types::Function;
    use std::collections::HashMap;
    use std::time::Duration;

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

    async fn wait_drained(store: &FunctionStore, fname: &str, n: u64) {
        for _ in 0..200 {
            if store.stats_snapshot(fname).await.unwrap().total_invocations >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("stats never reached {n} invocations");
    }

    #[tokio::test]
    async fn avg_svc_time_is_mean_of_n_samples() {
        let store = Arc::new(FunctionStore::new(
            StateStore::open_in_memory().unwrap(),
            CapacityGuard::new(4, 4),
            NetNsPool::new(4),
        ));
        store
            .add_deployed_function(make_function("echo", FunctionKind::Native))
            .await
            .unwrap();
        let policy = Arc::new(PolicyController::new(store.clone()));
        let agg = StatsAggregator::spawn(store.clone(), policy, 100);

        for exec_ms in [10, 20, 30] {
            agg.submit(
                "echo",
                "echo",
                BackendKind::Native,
                0,
                exec_ms,
                StartupType::Warm,
                false,
            );
        }
        wait_drained(&store, "echo", 3).await;

        let stats = store.stats_snapshot("echo").await.unwrap();
        assert_eq!(stats.avg_svc_time, 20);
        assert_eq!(stats.total_invocations, 3);
    }

    #[tokio::test]
    async fn percentiles_recompute_exactly_at_wrap() {
        let store = Arc::new(FunctionStore::new(
            StateStore::open_in_memory().unwrap(),
            CapacityGuard::new(4, 4),
            NetNsPool::new(4),
        ));
        store
            .add_deployed_function(make_function("echo", FunctionKind::Native))
            .await
            .unwrap();
        let policy = Arc::new(PolicyController::new(store.clone()));
        let agg = StatsAggregator::spawn(store.clone(), policy, 1000);

        for ms in 1..=100i64 {
            agg.submit("echo", "echo", BackendKind::Native, 0, ms, StartupType::Warm, false);
        }
        wait_drained(&store, "echo", 100).await;

        let stats = store.stats_snapshot("echo").await.unwrap();
        assert_eq!(stats.p50_svc_time, 50);
        assert_eq!(stats.p99_svc_time, 99);
    }

    #[tokio::test]
    async fn hybrid_submit_duplicates_into_both_streams() {
        let store = Arc::new(FunctionStore::new(
            StateStore::open_in_memory().unwrap(),
            CapacityGuard::new(4, 4),
            NetNsPool::new(4),
        ));
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
        let policy = Arc::new(PolicyController::new(store.clone()));
        let agg = StatsAggregator::spawn(store.clone(), policy, 100);

        agg.submit(
            "compress",
            "compress-w",
            BackendKind::Wasm,
            5,
            15,
            StartupType::Cold,
            true,
        );
        wait_drained(&store, "compress", 1).await;
        wait_drained(&store, "compress-w", 1).await;

        assert_eq!(
            store.stats_snapshot("compress").await.unwrap().total_invocations,
            1
        );
        assert_eq!(
            store
                .stats_snapshot("compress-w")
                .await
                .unwrap()
                .total_invocations,
            1
        );
    }
}
