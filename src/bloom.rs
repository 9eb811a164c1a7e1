//! Per-message path bloom filter (spec §3, §4.2, §9).
//!
//! Every GET/PUT/RESULT carries a small probabilistic set of peers that have
//! already handled it. Forwarders OR their own [`PeerId`] into the filter
//! before forwarding; `select_peer` consults it to avoid loops. The filter
//! is intentionally small (default 4 bytes) — false positives are common and
//! expected, this is cycle suppression, not exact loop detection (spec §9).

use crate::id::PeerId;

/// A fixed-size bloom filter keyed by k independent hash functions derived
/// from a single BLAKE3 hash of the member (GNUnet's `DV_DHT_BLOOM_K`
/// derives k positions the same way: one hash, sliced into k index words).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathBloom {
    bits: Vec<u8>,
    k: u32,
}

impl PathBloom {
    /// Create an empty filter with `size` bytes and `k` hash functions.
    #[must_use]
    pub fn new(size: usize, k: u32) -> Self {
        Self {
            bits: vec![0u8; size],
            k,
        }
    }

    /// Build a filter from raw wire bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], k: u32) -> Self {
        Self {
            bits: bytes.to_vec(),
            k,
        }
    }

    /// Raw bytes, as carried on the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn bit_positions(&self, peer: &PeerId) -> impl Iterator<Item = usize> + '_ {
        let digest = blake3::hash(peer.as_bytes());
        let digest_bytes = *digest.as_bytes();
        let total_bits = self.bits.len() * 8;
        (0..self.k).map(move |i| {
            let idx = i as usize;
            let a = u32::from_le_bytes(digest_bytes[(idx * 4) % 28..(idx * 4) % 28 + 4].try_into().unwrap());
            let b = u32::from_le_bytes(digest_bytes[28..32].try_into().unwrap());
            let combined = a.wrapping_add(b.wrapping_mul(idx as u32 + 1));
            if total_bits == 0 {
                0
            } else {
                (combined as usize) % total_bits
            }
        })
    }

    /// Add a peer to the filter.
    pub fn add(&mut self, peer: &PeerId) {
        let positions: Vec<usize> = self.bit_positions(peer).collect();
        for pos in positions {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    /// Test whether a peer is (probably) already in the filter.
    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.bit_positions(peer).all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    /// OR another filter's bits into this one (used when merging the bloom
    /// of a duplicate GET into the tracked RouteRecord's bloom).
    pub fn merge(&mut self, other: &PathBloom) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= b;
        }
    }
}

/// A small bloom filter over opaque byte hashes, used by `RouteRecord` to
/// track which RESULT payload hashes have already been forwarded back along
/// a given record (spec §3 `seen_results`). Distinct from [`PathBloom`]
/// because it tests 32-byte content hashes rather than peer identifiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultBloom {
    bits: Vec<u8>,
    k: u32,
}

impl ResultBloom {
    #[must_use]
    pub fn new(size: usize, k: u32) -> Self {
        Self {
            bits: vec![0u8; size],
            k,
        }
    }

    fn bit_positions(&self, hash: &[u8; 32]) -> impl Iterator<Item = usize> + '_ {
        let total_bits = self.bits.len() * 8;
        let k = self.k;
        (0..k).map(move |i| {
            let idx = i as usize;
            let a = u32::from_le_bytes(hash[(idx * 4) % 28..(idx * 4) % 28 + 4].try_into().unwrap());
            let b = u32::from_le_bytes(hash[28..32].try_into().unwrap());
            let combined = a.wrapping_add(b.wrapping_mul(idx as u32 + 1));
            if total_bits == 0 {
                0
            } else {
                (combined as usize) % total_bits
            }
        })
    }

    pub fn insert(&mut self, hash: &[u8; 32]) {
        let positions: Vec<usize> = self.bit_positions(hash).collect();
        for pos in positions {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    #[must_use]
    pub fn contains(&self, hash: &[u8; 32]) -> bool {
        self.bit_positions(hash).all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }
}

/// Hash a RESULT payload for `seen_results` deduplication.
#[must_use]
pub fn hash_payload(payload: &[u8]) -> [u8; 32] {
    *blake3::hash(payload).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_contains_nothing_reliably_for_distinct_peers() {
        let bloom = PathBloom::new(4, 16);
        let p = PeerId::random();
        assert!(!bloom.contains(&p));
    }

    #[test]
    fn added_peer_is_contained() {
        let mut bloom = PathBloom::new(4, 16);
        let p = PeerId::random();
        bloom.add(&p);
        assert!(bloom.contains(&p));
    }

    #[test]
    fn merge_is_union() {
        let mut a = PathBloom::new(4, 16);
        let mut b = PathBloom::new(4, 16);
        let p1 = PeerId::random();
        let p2 = PeerId::random();
        a.add(&p1);
        b.add(&p2);
        a.merge(&b);
        assert!(a.contains(&p1));
        assert!(a.contains(&p2));
    }

    #[test]
    fn result_bloom_roundtrip() {
        let mut bloom = ResultBloom::new(4, 16);
        let hash = hash_payload(b"hello world");
        assert!(!bloom.contains(&hash));
        bloom.insert(&hash);
        assert!(bloom.contains(&hash));
    }

    #[test]
    fn hash_payload_is_deterministic() {
        assert_eq!(hash_payload(b"abc"), hash_payload(b"abc"));
        assert_ne!(hash_payload(b"abc"), hash_payload(b"abd"));
    }
}
