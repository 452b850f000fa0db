use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Short-lived cache of *positive* block verdicts.
///
/// Only blocked addresses are ever inserted. Allow results are deliberately
/// not cached: a miss always goes back to the store, so an address that was
/// unblocked and re-blocked is picked up on the very next request, while a
/// newly-blocked address takes effect within one TTL at worst.
pub struct BlockListCache {
    entries: DashMap<IpAddr, Instant>,
    ttl: Duration,
}

impl BlockListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Whether a live blocked verdict is cached for this address.
    pub fn is_blocked(&self, address: &IpAddr) -> bool {
        if let Some(entry) = self.entries.get(address) {
            if Instant::now() < *entry.value() {
                return true;
            }
            drop(entry);
            self.entries.remove(address);
        }
        false
    }

    /// Record a blocked verdict for one TTL.
    pub fn mark_blocked(&self, address: IpAddr) {
        self.entries.insert(address, Instant::now() + self.ttl);
    }

    /// Drop a cached verdict, e.g. after an operator deactivates a block.
    pub fn evict(&self, address: &IpAddr) {
        self.entries.remove(address);
    }

    /// Evict expired entries. Driven by the periodic cleanup loop.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.entries.retain(|_, expires_at| now < *expires_at);
    }
}
