//! The k-bucket neighbor table (spec §3, §4.1).
//!
//! Buckets tile the full 512-bit identifier space by XOR-distance from the
//! local id; bucket `i` holds peers whose most-significant differing bit is
//! `i`. Peer selection for forwarding is not "pick the closest" — it is an
//! inverse-distance weighted random draw, ported from `GNUNET_DV_DHT_select_peer`
//! in `table.c`, so that load spreads across otherwise-equidistant peers
//! while still biasing toward the target.

use crate::bloom::PathBloom;
use crate::config::Config;
use crate::error::BucketError;
use crate::id::{PeerId, ID_BITS};
use rand::Rng;
use std::time::{Duration, Instant};

/// A single known remote peer and its liveness/latency bookkeeping
/// (spec §3 PeerEntry; ported from `table.c`'s `PeerInfo`).
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: PeerId,
    pub last_activity: Instant,
    pub last_ping_sent: Option<Instant>,
    pub expected_latency: Option<Duration>,
    pub request_count: u64,
    pub response_count: u64,
}

impl PeerEntry {
    fn new(id: PeerId, now: Instant) -> Self {
        Self {
            id,
            last_activity: now,
            last_ping_sent: None,
            expected_latency: None,
            request_count: 0,
            response_count: 0,
        }
    }

    /// Record that a ping was just sent (`table.c`'s `pingPeer`).
    fn record_ping_sent(&mut self, now: Instant) {
        self.last_ping_sent = Some(now);
        self.request_count += 1;
    }

    /// Record a pong/any fresh activity (`table.c`'s `pongNotify`).
    fn record_activity(&mut self, now: Instant) {
        if let Some(sent) = self.last_ping_sent {
            if now >= sent {
                self.expected_latency = Some(now.duration_since(sent));
            }
            self.response_count += 1;
        }
        self.last_activity = now;
    }
}

/// One k-bucket: up to `bucket_size` peers sharing the same distance class.
#[derive(Debug, Default)]
pub struct Bucket {
    peers: Vec<PeerEntry>,
}

impl Bucket {
    fn is_full(&self, capacity: usize) -> bool {
        self.peers.len() >= capacity
    }

    fn prune_expired(&mut self, now: Instant, timeout: Duration) {
        self.peers.retain(|p| now.duration_since(p.last_activity) <= timeout);
    }
}

/// Result of offering a peer to the table via [`PeerTable::consider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsiderOutcome {
    /// Peer inserted and a ping issued to measure latency.
    InsertedAndPinged,
    /// Peer is not known at the transport layer; caller should request a
    /// HELLO for it from `sender` via ASK_HELLO.
    NeedsHello,
    /// Peer is known but not connected; caller should send DISCOVERY to
    /// initiate a connection.
    NeedsDiscovery,
    /// Bucket was full even after pruning; candidate dropped silently.
    Dropped,
    /// Candidate was the local peer itself.
    Rejected(BucketError),
}

/// The full k-bucket table plus the local identity it is indexed against.
pub struct PeerTable {
    local_id: PeerId,
    buckets: Vec<Bucket>,
    bucket_size: usize,
    peer_timeout: Duration,
}

impl PeerTable {
    #[must_use]
    pub fn new(local_id: PeerId, config: &Config) -> Self {
        Self {
            local_id,
            buckets: (0..ID_BITS).map(|_| Bucket::default()).collect(),
            bucket_size: config.bucket_size,
            peer_timeout: config.peer_timeout,
        }
    }

    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    fn bucket_index_for(&self, peer: &PeerId) -> Option<usize> {
        peer.bucket_index(&self.local_id)
    }

    /// Offer `candidate` (learned about via a message forwarded by `sender`)
    /// to the table. Mirrors `table.c`'s `considerPeer`: prune expired
    /// entries if the bucket is full, drop silently if still full, and
    /// otherwise request a HELLO / DISCOVERY / ping depending on what the
    /// caller already knows about connectivity.
    ///
    /// This function only decides *what* should happen; it does not talk to
    /// `Identity`/`Core` itself (spec keeps those collaborators external).
    /// The caller passes in what is already known: `known_hello` (is a
    /// HELLO on file for `candidate`?) and `connected` (is it live at the
    /// transport layer?).
    pub fn consider(
        &mut self,
        _sender: &PeerId,
        candidate: PeerId,
        known_hello: bool,
        connected: bool,
        now: Instant,
    ) -> ConsiderOutcome {
        if candidate == self.local_id {
            return ConsiderOutcome::Rejected(BucketError::SelfInsert);
        }
        let Some(idx) = self.bucket_index_for(&candidate) else {
            return ConsiderOutcome::Rejected(BucketError::SelfInsert);
        };
        let bucket = &mut self.buckets[idx];

        if bucket.peers.iter().any(|p| p.id == candidate) {
            if let Some(entry) = bucket.peers.iter_mut().find(|p| p.id == candidate) {
                entry.record_activity(now);
            }
            return ConsiderOutcome::InsertedAndPinged;
        }

        if bucket.is_full(self.bucket_size) {
            bucket.prune_expired(now, self.peer_timeout);
        }
        if bucket.is_full(self.bucket_size) {
            return ConsiderOutcome::Dropped;
        }

        if !known_hello {
            return ConsiderOutcome::NeedsHello;
        }
        if !connected {
            return ConsiderOutcome::NeedsDiscovery;
        }

        let mut entry = PeerEntry::new(candidate, now);
        entry.record_ping_sent(now);
        bucket.peers.push(entry);
        ConsiderOutcome::InsertedAndPinged
    }

    /// Mark a ping as sent for a peer already in the table (used by the
    /// maintenance sweep for entries past `PEER_TIMEOUT/2`).
    pub fn mark_pinged(&mut self, peer: &PeerId, now: Instant) {
        if let Some(idx) = self.bucket_index_for(peer) {
            if let Some(entry) = self.buckets[idx].peers.iter_mut().find(|p| p.id == *peer) {
                entry.record_ping_sent(now);
            }
        }
    }

    /// Mark fresh activity for a peer (any received message renews it).
    pub fn mark_active(&mut self, peer: &PeerId, now: Instant) {
        if let Some(idx) = self.bucket_index_for(peer) {
            if let Some(entry) = self.buckets[idx].peers.iter_mut().find(|p| p.id == *peer) {
                entry.record_activity(now);
            }
        }
    }

    /// Remove peers whose `last_activity` exceeds `PEER_TIMEOUT`, and return
    /// the ids of peers that just crossed `PEER_TIMEOUT/2` and should be
    /// pinged (spec §4.1 maintenance task).
    pub fn expire_and_collect_ping_targets(&mut self, now: Instant, ping_threshold: Duration) -> Vec<PeerId> {
        let mut to_ping = Vec::new();
        for bucket in &mut self.buckets {
            bucket.peers.retain(|p| now.duration_since(p.last_activity) <= self.peer_timeout);
            for entry in &bucket.peers {
                let idle = now.duration_since(entry.last_activity);
                let already_pinged_since = entry
                    .last_ping_sent
                    .is_some_and(|sent| sent >= entry.last_activity);
                if idle >= ping_threshold && !already_pinged_since {
                    to_ping.push(entry.id);
                }
            }
        }
        to_ping
    }

    /// All currently-known peer ids, for iterating DV-connected peers during
    /// maintenance.
    #[must_use]
    pub fn all_peers(&self) -> Vec<PeerId> {
        self.buckets.iter().flat_map(|b| b.peers.iter().map(|p| p.id)).collect()
    }

    /// Highest non-empty bucket index plus one; an estimate of the network
    /// diameter in hops (`table.c`'s `estimate_network_diameter`).
    #[must_use]
    pub fn estimate_network_diameter(&self) -> u32 {
        for i in (1..self.buckets.len()).rev() {
            if !self.buckets[i].peers.is_empty() {
                return i as u32 + 1;
            }
        }
        1
    }

    /// `true` iff no known peer is strictly closer to `target` than self
    /// (`table.c`'s `am_closest_peer`).
    #[must_use]
    pub fn am_closest(&self, target: &PeerId) -> bool {
        let self_distance = self.local_id.distance(target);
        !self
            .all_peers()
            .iter()
            .any(|p| p.distance(target) < self_distance)
    }

    /// Inverse-distance weighted random peer selection toward `target`,
    /// excluding anyone in `blocked` or already present in `bloom`
    /// (`table.c`'s `GNUNET_DV_DHT_select_peer`, non-Kademlia branch).
    pub fn select_peer(&self, target: &PeerId, blocked: &[PeerId], bloom: &PathBloom) -> Option<PeerId> {
        let candidates: Vec<&PeerId> = self
            .buckets
            .iter()
            .flat_map(|b| b.peers.iter())
            .map(|p| &p.id)
            .filter(|id| !blocked.contains(id))
            .filter(|id| !bloom.contains(id))
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let weights: Vec<u64> = candidates
            .iter()
            .map(|id| u64::from(crate::id::inverse_distance(id.as_bytes(), target.as_bytes())))
            .collect();
        let total: u64 = weights.iter().sum();
        if total == 0 {
            return candidates.first().map(|id| **id);
        }

        let mut draw = rand::thread_rng().gen_range(0..total);
        for (id, weight) in candidates.iter().zip(weights.iter()) {
            if draw < *weight {
                return Some(**id);
            }
            draw -= *weight;
        }
        candidates.last().map(|id| **id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(local: PeerId) -> PeerTable {
        PeerTable::new(local, &Config::default())
    }

    #[test]
    fn self_insert_is_rejected() {
        let local = PeerId::random();
        let mut table = table_with(local);
        let now = Instant::now();
        assert_eq!(
            table.consider(&local, local, true, true, now),
            ConsiderOutcome::Rejected(BucketError::SelfInsert)
        );
    }

    #[test]
    fn unknown_hello_requests_hello() {
        let local = PeerId::random();
        let mut table = table_with(local);
        let candidate = PeerId::random();
        let now = Instant::now();
        assert_eq!(
            table.consider(&local, candidate, false, true, now),
            ConsiderOutcome::NeedsHello
        );
    }

    #[test]
    fn known_but_disconnected_requests_discovery() {
        let local = PeerId::random();
        let mut table = table_with(local);
        let candidate = PeerId::random();
        let now = Instant::now();
        assert_eq!(
            table.consider(&local, candidate, true, false, now),
            ConsiderOutcome::NeedsDiscovery
        );
    }

    #[test]
    fn known_and_connected_inserts() {
        let local = PeerId::random();
        let mut table = table_with(local);
        let candidate = PeerId::random();
        let now = Instant::now();
        assert_eq!(
            table.consider(&local, candidate, true, true, now),
            ConsiderOutcome::InsertedAndPinged
        );
        assert_eq!(table.all_peers().len(), 1);
    }

    #[test]
    fn am_closest_true_when_table_empty() {
        let local = PeerId::random();
        let table = table_with(local);
        let target = PeerId::random();
        assert!(table.am_closest(&target));
    }

    #[test]
    fn select_peer_none_when_table_empty() {
        let local = PeerId::random();
        let table = table_with(local);
        let target = PeerId::random();
        let bloom = PathBloom::new(4, 16);
        assert_eq!(table.select_peer(&target, &[], &bloom), None);
    }

    #[test]
    fn select_peer_excludes_blocked_and_bloomed() {
        let local = PeerId::random();
        let mut table = table_with(local);
        let candidate = PeerId::random();
        table.consider(&local, candidate, true, true, Instant::now());
        let target = PeerId::random();
        let bloom = PathBloom::new(4, 16);
        assert_eq!(table.select_peer(&target, &[candidate], &bloom), None);

        let mut bloom2 = PathBloom::new(4, 16);
        bloom2.add(&candidate);
        assert_eq!(table.select_peer(&target, &[], &bloom2), None);
    }

    #[test]
    fn diameter_defaults_to_one_when_empty() {
        let local = PeerId::random();
        let table = table_with(local);
        assert_eq!(table.estimate_network_diameter(), 1);
    }

    #[test]
    fn expire_removes_stale_and_collects_ping_targets() {
        let local = PeerId::random();
        let mut table = table_with(local);
        let candidate = PeerId::random();
        let start = Instant::now();
        table.consider(&local, candidate, true, true, start);

        let half = start + table.peer_timeout / 2 + Duration::from_secs(1);
        let targets = table.expire_and_collect_ping_targets(half, table.peer_timeout / 2);
        assert_eq!(targets, vec![candidate]);
        assert_eq!(table.all_peers().len(), 1);

        let past_timeout = start + table.peer_timeout + Duration::from_secs(1);
        let targets = table.expire_and_collect_ping_targets(past_timeout, table.peer_timeout / 2);
        assert!(targets.is_empty());
        assert!(table.all_peers().is_empty());
    }
}
