use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use fecore_types::Replica;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A distinguished MRU slot, an optional LRU slot, and a middle sequence of
/// replicas between them, with MRU-first reuse and LRU-side eviction
/// (SPEC_FULL.md §4.1). All members share the same parent function and
/// backend kind; the owning `FunctionStore` is responsible for keeping one
/// `IdlePool` per function+kind.
#[derive(Debug, Default)]
pub struct IdlePool {
    mru: Option<Replica>,
    lru: Option<Replica>,
    middle: VecDeque<Replica>,
    count: usize,
}

impl IdlePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// MRU-first hand-off: the freshest replica always ends up as MRU.
    pub fn push(&mut self, mut r: Replica) {
        r.touch(now_ms());
        match (self.mru.take(), self.lru.is_some(), self.middle.is_empty()) {
            (None, _, _) => {
                self.mru = Some(r);
            }
            (Some(old_mru), false, true) => {
                self.lru = Some(old_mru);
                self.mru = Some(r);
            }
            (Some(old_mru), _, _) => {
                self.middle.push_back(old_mru);
                self.mru = Some(r);
            }
        }
        self.count += 1;
    }

    /// Pops the MRU replica. When the middle is non-empty its tail is
    /// promoted to MRU; otherwise MRU becomes empty (SPEC_FULL.md §4.1) —
    /// a lone LRU is left stranded rather than promoted, reachable only via
    /// `peek_lru`/`evict_lru` (as `EvictorDaemon::sweep_function` does) or a
    /// subsequent `push`.
    pub fn pop(&mut self) -> Option<Replica> {
        let r = self.mru.take()?;
        self.mru = self.middle.pop_back();
        self.count -= 1;
        Some(r)
    }

    /// Pops from the head of the middle into LRU; if the middle is empty,
    /// clears LRU. Returns the replica evicted out of the pool entirely (the
    /// previous LRU), which the caller must destroy.
    pub fn evict_lru(&mut self) -> Option<Replica> {
        let evicted = self.lru.take();
        self.lru = self.middle.pop_front();
        if evicted.is_some() {
            self.count -= 1;
        }
        evicted
    }

    /// The current LRU-side replica, without removing it — used by
    /// `EvictorDaemon` to test the expiration threshold before evicting.
    pub fn peek_lru(&self) -> Option<&Replica> {
        self.lru.as_ref().or(self.mru.as_ref())
    }

    /// The current MRU-side replica, without removing it — `EvictorDaemon`
    /// also checks MRU once per sweep (SPEC_FULL.md §4.10).
    pub fn peek_mru(&self) -> Option<&Replica> {
        self.mru.as_ref()
    }

    /// Removes and returns the MRU replica unconditionally, used when the
    /// evictor finds a lone expired MRU with no LRU/middle to evict instead.
    /// Mirrors `pop`: a lone LRU is left stranded rather than promoted.
    pub fn evict_mru(&mut self) -> Option<Replica> {
        let r = self.mru.take()?;
        self.mru = self.middle.pop_back();
        self.count -= 1;
        Some(r)
    }
}
