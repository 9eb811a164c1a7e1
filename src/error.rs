//! Error types for the DHT core.
//!
//! All of these are local: none of them propagate as failures to callers of
//! `put`/`get` (spec §7). They exist so call sites can log, count, and decide
//! whether to continue, not so callers can retry synchronously.

use thiserror::Error;

/// Errors raised while decoding a wire message (spec §6).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message shorter than the fixed header")]
    TooShort,

    #[error("size field {declared} does not match header + payload length {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("unknown message type {0}")]
    UnknownType(u16),

    #[error("DISCOVERY peer count {count} exceeds cap of {cap}")]
    TooManyPeers { count: usize, cap: usize },
}

/// Errors raised while inserting a peer into a [`crate::peer_table::PeerTable`] bucket.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BucketError {
    #[error("bucket is full of live peers")]
    Full,

    #[error("cannot insert the local node into its own routing table")]
    SelfInsert,
}

/// The five error kinds from spec §7. All are handled locally by the
/// component that raised them; this enum exists for logging and counters.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Size field inconsistent with payload, or a zero-valued field where
    /// not allowed. The message is dropped and a stat incremented; it is
    /// never forwarded.
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] WireError),

    /// The routing table is full and the new `(key, type)` does not match
    /// any existing record. The new GET is dropped; the originator retries.
    #[error("routing table at capacity, dropping new route for an unrelated key")]
    CapacityExhausted,

    /// `select_peer` returned `None` and forwarding was required.
    #[error("no route available to forward toward the target key")]
    NoRouteAvailable,

    /// A `SourceRoute`'s peer is no longer connected at the transport layer.
    #[error("source route peer is no longer connected")]
    StaleSourceRoute,

    /// Unicast failed on a peer believed to be live.
    #[error("transient transport failure delivering to a peer")]
    TransportTransient,
}

pub(crate) type Result<T, E = CoreError> = std::result::Result<T, E>;
