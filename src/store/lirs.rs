//! # LIRS Cache with a Bounded Second Tier
//!
//! This module implements the replacement policy behind the block read cache:
//! LIRS (Low Inter-reference Recency Set) with an explicit, bounded secondary
//! tier.
//!
//! ## Why LIRS Instead of LRU?
//!
//! Plain LRU has a critical flaw for databases: a sequential scan evicts the
//! entire cache, because every scanned block becomes "most recently used"
//! once. LIRS ranks entries by *inter-reference recency* instead: blocks that
//! have been touched twice recently (LIR, "hot") are protected, while blocks
//! seen only once (HIR, "cold") pass through a small probationary queue and
//! are evicted quickly unless they are touched again.
//!
//! ```text
//! stack S (recency)          queue Q (resident cold)
//! ┌──────────────┐           ┌─────────────────────┐
//! │ MRU … hot +  │           │ oldest → evict here │
//! │ cold + ghosts│           └─────────────────────┘
//! └──────────────┘
//! ```
//!
//! Ghost entries (recently evicted keys, no data) let a re-touched cold block
//! be promoted straight to hot, which is what makes the policy
//! scan-resistant.
//!
//! ## Second Tier
//!
//! Evictions from the primary tier land in a bounded insertion-ordered
//! secondary tier. Entries stay there until they age out, are explicitly
//! removed, or the host signals memory pressure. A secondary hit re-promotes
//! the entry into the primary tier. Both tiers have hard bounds, so total
//! memory is `primary budget + secondary entries × entry size`.
//!
//! ## Concurrency
//!
//! Neither tier synchronizes internally; the cached-file wrapper holds its
//! channel lock around every call.

use std::collections::VecDeque;

use hashbrown::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Lir,
    HirResident,
    HirGhost,
}

#[derive(Debug)]
struct Entry<V> {
    value: Option<V>,
    memory: usize,
    state: State,
}

/// LIRS cache keyed by `u64`, bounded by total memory.
#[derive(Debug)]
pub struct LirsCache<V> {
    map: HashMap<u64, Entry<V>>,
    stack: VecDeque<u64>,
    queue: VecDeque<u64>,
    max_memory: usize,
    used_memory: usize,
    lir_memory: usize,
    lir_target: usize,
}

impl<V: Clone> LirsCache<V> {
    pub fn new(max_memory: usize) -> Self {
        Self {
            map: HashMap::new(),
            stack: VecDeque::new(),
            queue: VecDeque::new(),
            max_memory,
            used_memory: 0,
            lir_memory: 0,
            // hot set gets all but a sliver of the budget, the rest is the
            // probationary queue
            lir_target: max_memory - max_memory / 16,
        }
    }

    pub fn len(&self) -> usize {
        self.map
            .values()
            .filter(|e| e.state != State::HirGhost)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.used_memory == 0
    }

    pub fn used_memory(&self) -> usize {
        self.used_memory
    }

    pub fn get(&mut self, key: u64) -> Option<V> {
        let state = self.map.get(&key)?.state;
        match state {
            State::Lir => {
                self.move_to_stack_top(key);
                self.prune_stack();
            }
            State::HirResident => {
                if self.stack.contains(&key) {
                    // touched twice while still on the stack: promote
                    self.promote(key);
                } else {
                    self.move_to_stack_top(key);
                    self.queue.retain(|&k| k != key);
                    self.queue.push_back(key);
                }
            }
            State::HirGhost => return None,
        }
        self.map.get(&key).and_then(|e| e.value.clone())
    }

    /// Inserts a value, evicting as needed. Returns the resident entries that
    /// were pushed out, oldest first, so a host can demote them to a second
    /// tier.
    pub fn put(&mut self, key: u64, value: V, memory: usize) -> Vec<(u64, V)> {
        let was_ghost = match self.map.get(&key) {
            Some(e) if e.state == State::HirGhost => true,
            Some(_) => {
                self.remove(key);
                false
            }
            None => false,
        };

        let state = if was_ghost || self.lir_memory + memory <= self.lir_target {
            // ghost hit, or cache still warming up: straight to the hot set
            State::Lir
        } else {
            State::HirResident
        };

        self.map.insert(
            key,
            Entry {
                value: Some(value),
                memory,
                state,
            },
        );
        self.used_memory += memory;
        if state == State::Lir {
            self.lir_memory += memory;
        } else {
            self.queue.push_back(key);
        }
        self.move_to_stack_top(key);

        let mut evicted = Vec::new();
        while self.used_memory > self.max_memory {
            match self.evict_one() {
                Some(pair) => evicted.push(pair),
                None => break,
            }
        }
        self.prune_stack();
        evicted
    }

    pub fn remove(&mut self, key: u64) -> Option<V> {
        let entry = self.map.remove(&key)?;
        if entry.state != State::HirGhost {
            self.used_memory -= entry.memory;
        }
        if entry.state == State::Lir {
            self.lir_memory -= entry.memory;
        }
        self.stack.retain(|&k| k != key);
        self.queue.retain(|&k| k != key);
        entry.value
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.stack.clear();
        self.queue.clear();
        self.used_memory = 0;
        self.lir_memory = 0;
    }

    fn move_to_stack_top(&mut self, key: u64) {
        self.stack.retain(|&k| k != key);
        self.stack.push_front(key);
    }

    /// Promotes a cold resident entry to hot, demoting the stack-bottom hot
    /// entry into the queue to keep the hot set bounded.
    fn promote(&mut self, key: u64) {
        self.queue.retain(|&k| k != key);
        if let Some(e) = self.map.get_mut(&key) {
            e.state = State::Lir;
            self.lir_memory += e.memory;
        }
        self.move_to_stack_top(key);
        while self.lir_memory > self.lir_target {
            if !self.demote_stack_bottom() {
                break;
            }
        }
        self.prune_stack();
    }

    fn demote_stack_bottom(&mut self) -> bool {
        while let Some(&bottom) = self.stack.back() {
            let state = self.map.get(&bottom).map(|e| e.state);
            self.stack.pop_back();
            match state {
                Some(State::Lir) => {
                    if let Some(e) = self.map.get_mut(&bottom) {
                        e.state = State::HirResident;
                        self.lir_memory -= e.memory;
                    }
                    self.queue.push_back(bottom);
                    return true;
                }
                Some(State::HirGhost) | None => {
                    self.map.remove(&bottom);
                }
                Some(State::HirResident) => {}
            }
        }
        false
    }

    fn evict_one(&mut self) -> Option<(u64, V)> {
        if let Some(victim) = self.queue.pop_front() {
            let entry = self.map.get_mut(&victim)?;
            let value = entry.value.take();
            self.used_memory -= entry.memory;
            if self.stack.contains(&victim) {
                entry.state = State::HirGhost;
            } else {
                self.map.remove(&victim);
            }
            return value.map(|v| (victim, v));
        }
        // no cold residents left: sacrifice the oldest hot entry
        if self.demote_stack_bottom() {
            return self.evict_one();
        }
        None
    }

    /// Drops ghosts and cold entries below the lowest hot entry on the stack.
    fn prune_stack(&mut self) {
        while let Some(&bottom) = self.stack.back() {
            match self.map.get(&bottom) {
                Some(e) if e.state == State::Lir => break,
                Some(e) if e.state == State::HirGhost => {
                    self.stack.pop_back();
                    self.map.remove(&bottom);
                }
                Some(_) => {
                    self.stack.pop_back();
                }
                None => {
                    self.stack.pop_back();
                }
            }
        }
    }
}

/// Two-tier cache: LIRS primary plus a bounded secondary tier that holds
/// primary evictions until explicit eviction or memory pressure.
#[derive(Debug)]
pub struct TieredCache<V> {
    primary: LirsCache<V>,
    secondary: HashMap<u64, V>,
    secondary_order: VecDeque<u64>,
    secondary_capacity: usize,
}

impl<V: Clone> TieredCache<V> {
    pub fn new(max_memory: usize, secondary_capacity: usize) -> Self {
        Self {
            primary: LirsCache::new(max_memory),
            secondary: HashMap::new(),
            secondary_order: VecDeque::new(),
            secondary_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }

    pub fn get(&mut self, key: u64, memory: usize) -> Option<V> {
        if let Some(v) = self.primary.get(key) {
            return Some(v);
        }
        let v = self.remove_secondary(key)?;
        // secondary hit: re-promote into the primary tier
        self.insert_primary(key, v.clone(), memory);
        Some(v)
    }

    pub fn put(&mut self, key: u64, value: V, memory: usize) {
        self.remove_secondary(key);
        self.insert_primary(key, value, memory);
    }

    pub fn remove(&mut self, key: u64) {
        self.primary.remove(key);
        self.remove_secondary(key);
    }

    pub fn clear(&mut self) {
        self.primary.clear();
        self.secondary.clear();
        self.secondary_order.clear();
    }

    /// Host memory-pressure signal: the secondary tier is released wholesale.
    pub fn release_secondary(&mut self) {
        self.secondary.clear();
        self.secondary_order.clear();
    }

    fn insert_primary(&mut self, key: u64, value: V, memory: usize) {
        for (evicted_key, evicted) in self.primary.put(key, value, memory) {
            self.secondary.insert(evicted_key, evicted);
            self.secondary_order.push_back(evicted_key);
            while self.secondary.len() > self.secondary_capacity {
                if let Some(old) = self.secondary_order.pop_front() {
                    self.secondary.remove(&old);
                } else {
                    break;
                }
            }
        }
    }

    fn remove_secondary(&mut self, key: u64) -> Option<V> {
        let v = self.secondary.remove(&key);
        if v.is_some() {
            self.secondary_order.retain(|&k| k != key);
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_inserted_value() {
        let mut cache: LirsCache<u32> = LirsCache::new(1024);
        cache.put(1, 100, 64);

        assert_eq!(cache.get(1), Some(100));
        assert_eq!(cache.get(2), None);
    }

    #[test]
    fn memory_bound_is_respected() {
        let mut cache: LirsCache<u32> = LirsCache::new(256);
        for i in 0..32 {
            cache.put(i, i as u32, 64);
        }

        assert!(cache.used_memory() <= 256);
        assert!(cache.len() <= 4);
    }

    #[test]
    fn hot_entries_survive_a_scan() {
        let mut cache: LirsCache<u32> = LirsCache::new(1024);
        // establish a hot entry while the cache is warming
        cache.put(1, 10, 64);
        cache.get(1);
        cache.get(1);

        // scan: many one-touch entries
        for i in 100..200 {
            cache.put(i, i as u32, 64);
        }

        assert_eq!(cache.get(1), Some(10), "hot entry evicted by scan");
    }

    #[test]
    fn remove_frees_memory() {
        let mut cache: LirsCache<u32> = LirsCache::new(1024);
        cache.put(1, 10, 64);
        cache.put(2, 20, 64);

        assert_eq!(cache.remove(1), Some(10));
        assert_eq!(cache.used_memory(), 64);
        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache: LirsCache<u32> = LirsCache::new(1024);
        for i in 0..8 {
            cache.put(i, i as u32, 64);
        }

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.used_memory(), 0);
    }

    #[test]
    fn tiered_cache_demotes_evictions_to_second_tier() {
        let mut cache: TieredCache<u32> = TieredCache::new(256, 16);
        for i in 0..16 {
            cache.put(i, i as u32, 64);
        }

        // everything remains reachable: either primary-resident or demoted
        let mut found = 0;
        for i in 0..16 {
            if cache.get(i, 64).is_some() {
                found += 1;
            }
        }
        assert!(found > 4, "second tier should retain primary evictions");
    }

    #[test]
    fn tiered_cache_release_secondary_drops_only_second_tier() {
        let mut cache: TieredCache<u32> = TieredCache::new(256, 16);
        for i in 0..16 {
            cache.put(i, i as u32, 64);
        }

        cache.release_secondary();

        assert!(cache.len() <= 4);
    }

    #[test]
    fn tiered_cache_secondary_is_bounded() {
        let mut cache: TieredCache<u32> = TieredCache::new(128, 4);
        for i in 0..64 {
            cache.put(i, i as u32, 64);
        }

        assert!(cache.len() <= 2 + 4);
    }
}
