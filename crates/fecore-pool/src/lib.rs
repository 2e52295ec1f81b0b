//! The three resource pools the invocation scheduler gates replica creation
//! on: the per-function idle pool, the global WASM network-namespace pool,
//! and the global live-replica capacity guard.

mod capacity;
mod idle_pool;
mod netns;

pub use capacity::CapacityGuard;
pub use idle_pool::IdlePool;
pub use netns::NetNsPool;
