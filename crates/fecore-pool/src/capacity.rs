use std::sync::Mutex;
use std::time::Duration;

use fecore_types::BackendKind;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const BLOCKING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Counters {
    live_native: u32,
    live_wasm: u32,
}

/// Two global counters capping live native and WASM replicas
/// (SPEC_FULL.md §4.3). Exclusive-only: every operation takes the same
/// mutex, there is no separate read path.
pub struct CapacityGuard {
    max_native: u32,
    max_wasm: u32,
    counters: Mutex<Counters>,
}

impl CapacityGuard {
    pub fn new(max_native: u32, max_wasm: u32) -> Self {
        CapacityGuard {
            max_native,
            max_wasm,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn try_acquire(&self, kind: BackendKind) -> bool {
        let mut counters = self.counters.lock().unwrap();
        match kind {
            BackendKind::Native => {
                if counters.live_native < self.max_native {
                    counters.live_native += 1;
                    true
                } else {
                    false
                }
            }
            BackendKind::Wasm => {
                if counters.live_wasm < self.max_wasm {
                    counters.live_wasm += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn release(&self, kind: BackendKind) {
        let mut counters = self.counters.lock().unwrap();
        match kind {
            BackendKind::Native => {
                if counters.live_native > 0 {
                    counters.live_native -= 1;
                }
            }
            BackendKind::Wasm => {
                if counters.live_wasm > 0 {
                    counters.live_wasm -= 1;
                }
            }
        }
    }

    /// Polls `try_acquire` at 100ms granularity up to 60s; returns `false` on
    /// timeout rather than erroring, matching SPEC_FULL.md §4.3's rationale
    /// that invocations under pressure wait briefly rather than reject
    /// immediately.
    pub async fn acquire_blocking(&self, kind: BackendKind) -> bool {
        let deadline = tokio::time::Instant::now() + BLOCKING_TIMEOUT;
        loop {
            if self.try_acquire(kind) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(%kind, "capacity acquire timed out after 60s");
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn live(&self, kind: BackendKind) -> u32 {
        let counters = self.counters.lock().unwrap();
        match kind {
            BackendKind::Native => counters.live_native,
            BackendKind::Wasm => counters.live_wasm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_respects_cap() {
        let guard = CapacityGuard::new(2, 1);
        assert!(guard.try_acquire(BackendKind::Native));
        assert!(guard.try_acquire(BackendKind::Native));
        assert!(!guard.try_acquire(BackendKind::Native));
        assert_eq!(guard.live(BackendKind::Native), 2);
    }

    #[test]
    fn release_frees_a_slot() {
        let guard = CapacityGuard::new(1, 1);
        assert!(guard.try_acquire(BackendKind::Wasm));
        assert!(!guard.try_acquire(BackendKind::Wasm));
        guard.release(BackendKind::Wasm);
        assert!(guard.try_acquire(BackendKind::Wasm));
    }

    #[test]
    fn release_below_zero_is_noop() {
        let guard = CapacityGuard::new(1, 1);
        guard.release(BackendKind::Native);
        assert_eq!(guard.live(BackendKind::Native), 0);
    }

    #[test]
    fn kinds_are_independent() {
        let guard = CapacityGuard::new(1, 1);
        assert!(guard.try_acquire(BackendKind::Native));
        assert!(guard.try_acquire(BackendKind::Wasm));
        assert_eq!(guard.live(BackendKind::Native), 1);
        assert_eq!(guard.live(BackendKind::Wasm), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_blocking_succeeds_once_released() {
        let guard = std::sync::Arc::new(CapacityGuard::new(1, 1));
        assert!(guard.try_acquire(BackendKind::Native));

        let g2 = guard.clone();
        let waiter = tokio::spawn(async move { g2.acquire_blocking(BackendKind::Native).await });

        tokio::time::advance(Duration::from_millis(250)).await;
        guard.release(BackendKind::Native);
        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_blocking_times_out_after_60s() {
        let guard = std::sync::Arc::new(CapacityGuard::new(1, 1));
        assert!(guard.try_acquire(BackendKind::Native));

        let g2 = guard.clone();
        let waiter = tokio::spawn(async move { g2.acquire_blocking(BackendKind::Native).await });

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!waiter.await.unwrap());
    }
}
