use std::collections::{BTreeMap, HashMap};

use super::NegotiationKey;
use crate::connectors::Alpn;

pub(crate) const DEFAULT_CACHE_CAPACITY: usize = 1000;

struct Entry {
    protocol: Alpn,
    tick: u64,
}

/// Bounded LRU map from negotiation key to the protocol the server picked.
///
/// Every hit or insert stamps the entry with a fresh tick; `order` keeps
/// ticks sorted so the least recently used entry is always the first one.
pub struct ProtocolCache {
    entries: HashMap<NegotiationKey, Entry>,
    order: BTreeMap<u64, NegotiationKey>,
    tick: u64,
    capacity: usize,
}

impl ProtocolCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity.min(DEFAULT_CACHE_CAPACITY)),
            order: BTreeMap::new(),
            tick: 0,
            capacity,
        }
    }

    #[inline]
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&mut self, key: &NegotiationKey) -> Option<Alpn> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.clone());
        Some(entry.protocol)
    }

    /// Look up `key` without touching its recency.
    pub fn peek(&self, key: &NegotiationKey) -> Option<Alpn> {
        self.entries.get(key).map(|e| e.protocol)
    }

    pub fn insert(&mut self, key: NegotiationKey, protocol: Alpn) {
        let tick = self.next_tick();
        if let Some(old) = self.entries.insert(key.clone(), Entry { protocol, tick }) {
            self.order.remove(&old.tick);
        }
        self.order.insert(tick, key);

        while self.entries.len() > self.capacity {
            let Some((_, evicted)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&evicted);
            #[cfg(feature = "logging")]
            tracing::debug!("protocol cache evicted {}", evicted);
        }
    }

    pub fn remove(&mut self, key: &NegotiationKey) -> Option<Alpn> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry.protocol)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for ProtocolCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
