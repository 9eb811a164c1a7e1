//! The bounded routing-record table (spec §3, §4.2).
//!
//! A `RouteRecord` is created on the first GET for a `(key, content_type)`
//! pair and tracks who to deliver RESULTs to. Lookup is by `(key,
//! content_type)`; eviction picks the oldest record once the table is full,
//! so a hashmap-plus-min-heap pairing gives O(1) lookup and O(log n)
//! eviction, mirroring `DV_DHTResults` in the original's `routing.c`.

use crate::bloom::ResultBloom;
use crate::id::{Key, PeerId};
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

/// Where a RESULT for a tracked GET should ultimately be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// A local subscriber, identified by an opaque handle the caller
    /// assigned when it issued the GET.
    Local(u64),
    /// A remote peer that forwarded this GET to us.
    Remote(PeerId),
}

/// One subscriber/forwarder waiting on results for a tracked GET
/// (spec §3 SourceRoute).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRoute {
    pub target: RouteTarget,
    /// Whether at least one RESULT has already been delivered here.
    pub received: bool,
}

impl SourceRoute {
    #[must_use]
    pub fn new(target: RouteTarget) -> Self {
        Self {
            target,
            received: false,
        }
    }
}

/// A tracked in-flight GET (spec §3 RouteRecord).
#[derive(Debug, Clone)]
pub struct RouteRecord {
    pub key: Key,
    pub content_type: u32,
    pub hop_count: u32,
    pub sources: Vec<SourceRoute>,
    pub seen_results: ResultBloom,
    pub expired: bool,
    inserted_at: Instant,
    seq: u64,
}

impl RouteRecord {
    /// Add `source` unless an equivalent one is already tracked (spec §4.2:
    /// "duplicate GETs" extend `sources` rather than create a new entry).
    pub fn add_source(&mut self, source: SourceRoute) {
        if !self.sources.iter().any(|s| s.target == source.target) {
            self.sources.push(source);
        }
    }

    /// Distinct delivered-result count used for the `MAX_RESULTS` cutoff.
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.sources.iter().filter(|s| s.received).count()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct EvictionKey {
    seq: u64,
    slot: usize,
}

impl Ord for EvictionKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse: BinaryHeap is a max-heap, we want the *smallest* seq on top.
        other.seq.cmp(&self.seq)
    }
}

impl PartialOrd for EvictionKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded table of [`RouteRecord`]s keyed by `(Key, content_type)`.
pub struct RouteTable {
    capacity: usize,
    slots: Vec<Option<RouteRecord>>,
    index: HashMap<(Key, u32), usize>,
    eviction_order: BinaryHeap<EvictionKey>,
    next_seq: u64,
    free_slots: Vec<usize>,
    bloom_size: usize,
    bloom_k: u32,
}

impl RouteTable {
    #[must_use]
    pub fn new(capacity: usize, bloom_size: usize, bloom_k: u32) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            index: HashMap::new(),
            eviction_order: BinaryHeap::new(),
            next_seq: 0,
            free_slots: Vec::new(),
            bloom_size,
            bloom_k,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &Key, content_type: u32) -> Option<&RouteRecord> {
        let idx = *self.index.get(&(*key, content_type))?;
        self.slots[idx].as_ref()
    }

    #[must_use]
    pub fn get_mut(&mut self, key: &Key, content_type: u32) -> Option<&mut RouteRecord> {
        let idx = *self.index.get(&(*key, content_type))?;
        self.slots[idx].as_mut()
    }

    /// Iterate every tracked record whose key matches; in this table there
    /// is at most one record per `(key, content_type)`, but RESULT handling
    /// needs to match by `key` alone across possibly several content types.
    pub fn records_for_key(&self, key: &Key) -> impl Iterator<Item = &RouteRecord> {
        self.slots.iter().filter_map(move |slot| {
            slot.as_ref().filter(|r| r.key == *key)
        })
    }

    pub fn records_for_key_mut(&mut self, key: &Key) -> impl Iterator<Item = &mut RouteRecord> {
        self.slots.iter_mut().filter_map(move |slot| {
            slot.as_mut().filter(|r| r.key == *key)
        })
    }

    /// Insert a fresh record for `(key, content_type)` if none exists.
    /// Returns `false` (capacity exhausted) if the table is full and no
    /// existing record is evictable, i.e. this is a genuinely new key under
    /// a full table (spec §7 `CapacityExhausted`).
    pub fn insert_new(
        &mut self,
        key: Key,
        content_type: u32,
        hop_count: u32,
        first_source: SourceRoute,
        now: Instant,
    ) -> bool {
        if self.index.contains_key(&(key, content_type)) {
            return true;
        }
        if self.index.len() >= self.capacity && !self.evict_oldest() {
            return false;
        }

        let record = RouteRecord {
            key,
            content_type,
            hop_count,
            sources: vec![first_source],
            seen_results: ResultBloom::new(self.bloom_size, self.bloom_k),
            expired: false,
            inserted_at: now,
            seq: self.next_seq,
        };
        let seq = self.next_seq;
        self.next_seq += 1;

        let slot = if let Some(free) = self.free_slots.pop() {
            self.slots[free] = Some(record);
            free
        } else {
            self.slots.push(Some(record));
            self.slots.len() - 1
        };
        self.index.insert((key, content_type), slot);
        self.eviction_order.push(EvictionKey { seq, slot });
        true
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some(candidate) = self.eviction_order.pop() {
            let still_live = self.slots.get(candidate.slot).and_then(Option::as_ref).is_some_and(|r| r.seq == candidate.seq);
            if still_live {
                self.remove_slot(candidate.slot);
                return true;
            }
        }
        false
    }

    fn remove_slot(&mut self, slot: usize) {
        if let Some(record) = self.slots[slot].take() {
            self.index.remove(&(record.key, record.content_type));
            self.free_slots.push(slot);
        }
    }

    /// Remove a record explicitly once it has been marked `expired`
    /// (spec §3: record reaching MAX_RESULTS is marked expired).
    pub fn remove_expired(&mut self) {
        let to_remove: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|r| r.expired).map(|_| i))
            .collect();
        for slot in to_remove {
            self.remove_slot(slot);
        }
    }

    /// Drop the `SourceRoute` for `target` in every tracked record
    /// (`stop(key, type, sink)` cancellation, spec §5).
    pub fn remove_source_everywhere(&mut self, target: RouteTarget) {
        for slot in &mut self.slots {
            if let Some(record) = slot {
                record.sources.retain(|s| s.target != target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceRoute {
        SourceRoute::new(RouteTarget::Local(1))
    }

    #[test]
    fn insert_and_lookup() {
        let mut table = RouteTable::new(4, 4, 16);
        let key = Key::random();
        assert!(table.insert_new(key, 0, 0, source(), Instant::now()));
        assert!(table.get(&key, 0).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_get_extends_sources_not_a_new_record() {
        let mut table = RouteTable::new(4, 4, 16);
        let key = Key::random();
        let now = Instant::now();
        table.insert_new(key, 0, 0, source(), now);
        table.insert_new(key, 0, 1, SourceRoute::new(RouteTarget::Local(2)), now);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&key, 0).unwrap().sources.len(), 1);

        table.get_mut(&key, 0).unwrap().add_source(SourceRoute::new(RouteTarget::Local(2)));
        assert_eq!(table.get(&key, 0).unwrap().sources.len(), 2);
    }

    #[test]
    fn capacity_eviction_drops_oldest() {
        let mut table = RouteTable::new(2, 4, 16);
        let k1 = Key::random();
        let k2 = Key::random();
        let k3 = Key::random();
        let now = Instant::now();
        assert!(table.insert_new(k1, 0, 0, source(), now));
        assert!(table.insert_new(k2, 0, 0, source(), now));
        assert!(table.insert_new(k3, 0, 0, source(), now));

        assert_eq!(table.len(), 2);
        assert!(table.get(&k1, 0).is_none());
        assert!(table.get(&k2, 0).is_some());
        assert!(table.get(&k3, 0).is_some());
    }

    #[test]
    fn remove_source_everywhere_prunes_matching_target() {
        let mut table = RouteTable::new(4, 4, 16);
        let key = Key::random();
        let target = RouteTarget::Remote(PeerId::random());
        table.insert_new(key, 0, 0, SourceRoute::new(target), Instant::now());
        table.remove_source_everywhere(target);
        assert!(table.get(&key, 0).unwrap().sources.is_empty());
    }

    #[test]
    fn expired_records_are_removed() {
        let mut table = RouteTable::new(4, 4, 16);
        let key = Key::random();
        table.insert_new(key, 0, 0, source(), Instant::now());
        table.get_mut(&key, 0).unwrap().expired = true;
        table.remove_expired();
        assert!(table.get(&key, 0).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn records_for_key_matches_across_content_types() {
        let mut table = RouteTable::new(4, 4, 16);
        let key = Key::random();
        table.insert_new(key, 0, 0, source(), Instant::now());
        table.insert_new(key, 1, 0, source(), Instant::now());
        assert_eq!(table.records_for_key(&key).count(), 2);
    }
}
