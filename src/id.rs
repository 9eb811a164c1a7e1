//! 512-bit identifiers and the XOR distance metric.
//!
//! Both peers and content items live in the same 512-bit identifier space.
//! [`PeerId`] and [`Key`] are distinct newtypes over the same byte layout so
//! the two are never confused at a call site, but they share the same
//! distance computation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Number of bytes in an identifier (512 bits).
pub const ID_BYTES: usize = 64;

/// Number of bits in an identifier.
pub const ID_BITS: usize = ID_BYTES * 8;

fn random_bytes() -> [u8; ID_BYTES] {
    use rand::RngCore;
    let mut bytes = [0u8; ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn fmt_prefix(bytes: &[u8; ID_BYTES], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in &bytes[..4] {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

/// Index of the most-significant bit at which `a` and `b` differ, or `None`
/// if the two identifiers are identical.
///
/// Bit 0 is the most significant bit of the first byte; bit `ID_BITS - 1`
/// is the least significant bit of the last byte. A lower index means the
/// two identifiers diverge earlier (closer in the XOR metric means they
/// diverge *later*, i.e. share a longer common prefix).
fn most_significant_diff_bit(a: &[u8; ID_BYTES], b: &[u8; ID_BYTES]) -> Option<usize> {
    for i in 0..ID_BYTES {
        let x = a[i] ^ b[i];
        if x != 0 {
            return Some(i * 8 + x.leading_zeros() as usize);
        }
    }
    None
}

/// Construct the 32-bit distance metric used for inverse-distance weighted
/// peer selection.
///
/// The most significant 9 bits (`log2(ID_BITS)` rounded up) of the result
/// encode how early the identifiers diverge (0 = share no prefix at all -
/// maximally far, `ID_BITS` = identical). The remaining low bits are filled
/// from the bits immediately following the first divergence, so that two
/// pairs diverging at the same bit index are still ordered relative to each
/// other. Smaller return value means closer. Returns `0` for identical
/// identifiers and `u32::MAX` when the very first bit differs.
#[must_use]
pub fn bit_distance(a: &[u8; ID_BYTES], b: &[u8; ID_BYTES]) -> u32 {
    const METRIC_BITS: u32 = 32;
    const PREFIX_BITS: u32 = 9; // ceil(log2(512))

    let Some(bucket) = most_significant_diff_bit(a, b) else {
        return 0;
    };
    if bucket == 0 {
        return u32::MAX;
    }
    let bucket = bucket as u32;

    let msb = (ID_BITS as u32 - bucket) << (METRIC_BITS - PREFIX_BITS);

    let mut lsb: u32 = 0;
    let lsb_bits = METRIC_BITS - PREFIX_BITS;
    let end = (bucket + 1 + lsb_bits).min(ID_BITS as u32);
    for i in (bucket + 1)..end {
        if get_bit(a, i as usize) != get_bit(b, i as usize) {
            lsb |= 1 << (bucket + lsb_bits - i);
        }
    }
    msb | lsb
}

fn get_bit(bytes: &[u8; ID_BYTES], index: usize) -> bool {
    let byte = bytes[index / 8];
    let shift = 7 - (index % 8);
    (byte >> shift) & 1 == 1
}

/// Inverse of [`bit_distance`]: larger means closer. Used directly as the
/// weight in inverse-distance weighted peer selection.
#[must_use]
pub fn inverse_distance(a: &[u8; ID_BYTES], b: &[u8; ID_BYTES]) -> u32 {
    u32::MAX - bit_distance(a, b)
}

macro_rules! id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name([u8; ID_BYTES]);

        impl $name {
            /// Generate a random identifier. Used for testing and for
            /// ephemeral local subscriber handles; real peer identifiers
            /// are supplied by the authenticated transport layer.
            #[must_use]
            pub fn random() -> Self {
                Self(random_bytes())
            }

            /// Construct an identifier from raw bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
                Self(bytes)
            }

            /// Construct an identifier that is all zero bytes. Used only in
            /// tests; never a valid peer or content identity in practice.
            #[must_use]
            pub const fn zero() -> Self {
                Self([0u8; ID_BYTES])
            }

            /// Raw bytes of this identifier.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; ID_BYTES] {
                &self.0
            }

            /// 32-bit distance metric to another identifier in this space
            /// (smaller means closer). See [`bit_distance`].
            #[must_use]
            pub fn distance(&self, other: &Self) -> u32 {
                bit_distance(&self.0, &other.0)
            }

            /// Index of the most-significant differing bit relative to
            /// `other`, or `None` if identical. This is the Kademlia bucket
            /// index: `0` is nearest, `ID_BITS - 1` is farthest.
            #[must_use]
            pub fn bucket_index(&self, other: &Self) -> Option<usize> {
                most_significant_diff_bit(&self.0, &other.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "("))?;
                fmt_prefix(&self.0, f)?;
                write!(f, "…)")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt_prefix(&self.0, f)
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.0.cmp(&other.0)
            }
        }
    };
}

id_type!(PeerId, "512-bit identifier of a peer, derived from its public key.");
id_type!(Key, "512-bit identifier of a content item.");

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn distance_identity_is_zero() {
        let a = PeerId::random();
        assert_eq!(a.distance(&a), 0);
    }

    #[test]
    fn distance_symmetry() {
        let a = PeerId::random();
        let b = PeerId::random();
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn distance_max_when_msb_differs() {
        let bytes_a = [0u8; ID_BYTES];
        let mut bytes_b = [0u8; ID_BYTES];
        bytes_b[0] = 0b1000_0000;
        let a = PeerId::from_bytes(bytes_a);
        let b = PeerId::from_bytes(bytes_b);
        assert_eq!(a.distance(&b), u32::MAX);
    }

    #[test]
    fn distance_decreases_with_longer_shared_prefix() {
        let base = [0u8; ID_BYTES];
        let mut far = [0u8; ID_BYTES];
        far[0] = 0b0100_0000; // differs at bit 1
        let mut near = [0u8; ID_BYTES];
        near[3] = 0b0000_0001; // differs at bit 31

        let base_id = PeerId::from_bytes(base);
        let far_id = PeerId::from_bytes(far);
        let near_id = PeerId::from_bytes(near);

        assert!(base_id.distance(&far_id) > base_id.distance(&near_id));
    }

    #[test]
    fn bucket_index_none_for_self() {
        let a = PeerId::random();
        assert_eq!(a.bucket_index(&a), None);
    }

    #[test]
    fn bucket_index_full_range() {
        let local = PeerId::zero();
        for bucket in 0..ID_BITS {
            let byte_index = bucket / 8;
            let bit_index = 7 - (bucket % 8);
            let mut bytes = [0u8; ID_BYTES];
            bytes[byte_index] = 1 << bit_index;
            let remote = PeerId::from_bytes(bytes);
            assert_eq!(remote.bucket_index(&local), Some(bucket));
        }
    }

    #[test]
    fn peer_id_and_key_are_distinct_types() {
        let p = PeerId::random();
        let bytes = *p.as_bytes();
        let k = Key::from_bytes(bytes);
        assert_eq!(p.as_bytes(), k.as_bytes());
    }

    #[test]
    fn inverse_distance_is_monotonic() {
        let base = [0u8; ID_BYTES];
        let mut far = [0u8; ID_BYTES];
        far[0] = 0b0100_0000;
        let mut near = [0u8; ID_BYTES];
        near[3] = 0b0000_0001;
        assert!(inverse_distance(&base, &near) > inverse_distance(&base, &far));
    }

    fn id_bytes_strategy() -> impl proptest::strategy::Strategy<Value = [u8; ID_BYTES]> {
        proptest::collection::vec(proptest::prelude::any::<u8>(), ID_BYTES)
            .prop_map(|v| v.try_into().expect("exact length vec"))
    }

    proptest::proptest! {
        #[test]
        fn prop_distance_is_symmetric(a in id_bytes_strategy(), b in id_bytes_strategy()) {
            let pa = PeerId::from_bytes(a);
            let pb = PeerId::from_bytes(b);
            prop_assert_eq!(pa.distance(&pb), pb.distance(&pa));
        }

        #[test]
        fn prop_distance_to_self_is_zero(a in id_bytes_strategy()) {
            let pa = PeerId::from_bytes(a);
            prop_assert_eq!(pa.distance(&pa), 0);
        }

        #[test]
        fn prop_distance_and_inverse_distance_sum_to_max(a in id_bytes_strategy(), b in id_bytes_strategy()) {
            let pa = PeerId::from_bytes(a);
            let pb = PeerId::from_bytes(b);
            prop_assert_eq!(pa.distance(&pb) as u64 + inverse_distance(&a, &b) as u64, u32::MAX as u64);
        }

        #[test]
        fn prop_bucket_index_matches_distance_zero_iff_equal(a in id_bytes_strategy(), b in id_bytes_strategy()) {
            let pa = PeerId::from_bytes(a);
            let pb = PeerId::from_bytes(b);
            prop_assert_eq!(pa.bucket_index(&pb).is_none(), pa.distance(&pb) == 0);
        }
    }
}
