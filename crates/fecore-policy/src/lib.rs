//! Re-evaluates hybrid policy from aggregated stats on event thresholds
//! (SPEC_FULL.md §4.9). Invoked off-band by `fecore-stats`'s aggregator.

use std::sync::Arc;

use tracing::debug;

use fecore_scheduler::FunctionStore;
use fecore_types::{BackendKind, Error, FunctionKind, MAX_EXTRA};

pub struct PolicyController {
    store: Arc<FunctionStore>,
}

impl PolicyController {
    pub fn new(store: Arc<FunctionStore>) -> Self {
        PolicyController { store }
    }

    fn hybrid_siblings(kind: &FunctionKind) -> Option<(&str, &str)> {
        match kind {
            FunctionKind::Hybrid { native, wasm } => Some((native.as_str(), wasm.as_str())),
            _ => None,
        }
    }

    /// Compares `avgSvcCold` of the hybrid's native vs. wasm underlying
    /// function and steers `coldStartKind` to the lower.
    pub async fn eval_cold_start(&self, fname: &str) -> Result<(), Error> {
        let f = self.store.get_deployed_function(fname).await?;
        let Some((native, wasm)) = Self::hybrid_siblings(&f.kind) else {
            return Ok(());
        };
        let native_stats = self.store.stats_snapshot(native).await?;
        let wasm_stats = self.store.stats_snapshot(wasm).await?;

        let chosen = if native_stats.avg_svc_cold <= wasm_stats.avg_svc_cold {
            BackendKind::Native
        } else {
            BackendKind::Wasm
        };

        self.store
            .with_policy_mut(fname, |policy| {
                policy.cold_start_kind = chosen;
                if chosen == policy.warm_start_kind {
                    policy.keep_cold_starter = 60;
                }
                policy.spawn_extra = if chosen == BackendKind::Native { 0 } else { 1 };
            })
            .await?;

        debug!(function = %fname, ?chosen, "EvalColdStart applied");
        Ok(())
    }

    /// Compares `avgSvcWarm` and steers `warmStartKind` to the lower.
    pub async fn eval_warm_start(&self, fname: &str) -> Result<(), Error> {
        let f = self.store.get_deployed_function(fname).await?;
        let Some((native, wasm)) = Self::hybrid_siblings(&f.kind) else {
            return Ok(());
        };
        let native_stats = self.store.stats_snapshot(native).await?;
        let wasm_stats = self.store.stats_snapshot(wasm).await?;

        let chosen = if native_stats.avg_svc_warm <= wasm_stats.avg_svc_warm {
            BackendKind::Native
        } else {
            BackendKind::Wasm
        };

        self.store
            .with_policy_mut(fname, |policy| policy.warm_start_kind = chosen)
            .await?;

        debug!(function = %fname, ?chosen, "EvalWarmStart applied");
        Ok(())
    }

    /// `coldRatio <= 0.10` decrements `spawnExtra`; `coldRatio >= 0.25`
    /// increments it. Clamped to `[0, MAX_EXTRA)` here, per the spec's
    /// explicit allowance that an implementation "may and should" clamp.
    pub async fn eval_spawn_extra(
        &self,
        fname: &str,
        _utilization: f32,
        cold_ratio: f32,
    ) -> Result<(), Error> {
        self.store
            .with_policy_mut(fname, |policy| {
                if cold_ratio <= 0.10 {
                    policy.spawn_extra = policy.spawn_extra.saturating_sub(1);
                } else if cold_ratio >= 0.25 {
                    policy.spawn_extra = (policy.spawn_extra + 1).min(MAX_EXTRA - 1);
                }
            })
            .await?;
        Ok(())
    }
}
