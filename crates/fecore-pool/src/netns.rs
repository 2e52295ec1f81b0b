use std::collections::VecDeque;

use tokio::sync::Mutex;

/// Bounded pool of pre-provisioned `(nsNum, ip)` pairs for WASM replicas
/// (SPEC_FULL.md §4.2). Populated once at startup; a single lock serializes
/// `acquire`/`release`, both O(1).
pub struct NetNsPool {
    slots: Mutex<VecDeque<(u32, String)>>,
}

const MAX_NETNS: usize = 1000;

impl NetNsPool {
    /// Pre-provisions `min(requested, 1000)` `(nsNum, ip)` pairs starting at
    /// `10.63.100.1`, skipping the `.0` host address and rolling the third
    /// octet over whenever the fourth exhausts `.254`.
    pub fn new(requested: usize) -> Self {
        let n = requested.min(MAX_NETNS);
        let mut slots = VecDeque::with_capacity(n);
        let mut octet3: u8 = 100;
        let mut octet4: u8 = 1;
        for ns_num in 1..=n as u32 {
            slots.push_back((ns_num, format!("10.63.{octet3}.{octet4}")));
            if octet4 >= 254 {
                octet4 = 1;
                octet3 = octet3.wrapping_add(1);
            } else {
                octet4 += 1;
            }
        }
        NetNsPool {
            slots: Mutex::new(slots),
        }
    }

    pub async fn acquire(&self) -> Option<(u32, String)> {
        self.slots.lock().await.pop_front()
    }

    pub async fn release(&self, ns_num: u32, ip: String) {
        self.slots.lock().await.push_back((ns_num, ip));
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}
