//! Pending anti-replay challenges, keyed by node MAC.
//!
//! One entry per node, consumed by the first application header that matches
//! it. Reissuing an unconsumed entry keeps a node that missed the reply in
//! sync with the host. There is no TTL: the map is bounded by the number of
//! distinct active nodes and self-prunes through consumption.

use std::collections::HashMap;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::core::MacAddress;

/// MAC -> pending 32-bit challenge.
#[derive(Default)]
pub struct ChallengeCache {
    entries: HashMap<u64, u32>,
}

impl ChallengeCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pending challenge for `mac`, issuing a fresh random one if
    /// none exists. Repeated calls without an intervening consume return the
    /// same value.
    pub fn get_or_issue(&mut self, mac: MacAddress) -> u32 {
        *self
            .entries
            .entry(mac.as_u64())
            .or_insert_with(|| OsRng.next_u32())
    }

    /// The pending challenge for `mac`, if any.
    pub fn pending(&self, mac: MacAddress) -> Option<u32> {
        self.entries.get(&mac.as_u64()).copied()
    }

    /// Consume the entry for `mac` iff it is present and equals `value`.
    pub fn consume(&mut self, mac: MacAddress, value: u32) -> bool {
        match self.entries.get(&mac.as_u64()) {
            Some(&pending) if pending == value => {
                self.entries.remove(&mac.as_u64());
                true
            }
            _ => false,
        }
    }

    /// Unconditionally drop the entry for `mac`.
    pub fn invalidate(&mut self, mac: MacAddress) {
        self.entries.remove(&mac.as_u64());
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
