//! Narrow interfaces onto the external collaborators named in spec §2.
//!
//! None of these are implemented by this crate. `Core` owns ciphertext
//! transport and peer authentication; `DStore` owns the ephemeral content
//! cache; `PingPong` measures liveness; `Identity` tracks which peers have a
//! known, connectable HELLO; `Stats` is a counters sink; `LocalSink` is how a
//! locally-originated GET actually receives its results. The hosting daemon
//! supplies concrete implementations via [`crate::init`].

use crate::error::CoreError;
use crate::id::{Key, PeerId};
use crate::wire::Message;
use async_trait::async_trait;

/// Encrypted transport and peer-authentication layer.
///
/// `Routing` and the maintenance task call `unicast` to send wire messages;
/// they never construct or inspect ciphertext. Per spec §5, the unicast
/// primitive must not re-enter the core synchronously — implementations
/// should queue outbound sends rather than call back into this crate from
/// within `unicast`.
#[async_trait]
pub trait Core: Send + Sync {
    /// Send a message to a specific peer. Fails with
    /// [`CoreError::TransportTransient`] on transient delivery failure, or
    /// [`CoreError::StaleSourceRoute`] if the peer is no longer connected.
    async fn unicast(&self, peer: &PeerId, message: &Message) -> Result<(), CoreError>;

    /// Whether `peer` currently has an active transport session.
    async fn is_connected(&self, peer: &PeerId) -> bool;
}

/// Outcome returned from a [`DStore`] hit callback, mirroring the original's
/// stop/continue iteration protocol (spec §4.2 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultAction {
    /// Keep iterating over further local hits.
    Continue,
    /// Stop iterating; no further local hits will be delivered for this GET.
    Stop,
}

/// Local content-addressed ephemeral store.
///
/// Consulted first on every GET, and written to when this node is the
/// closest replica for a PUT (spec §4.2 step 4, "self-caching monotonicity"
/// in spec §8).
#[async_trait]
pub trait DStore: Send + Sync {
    /// Cache `payload` under `(key, content_type)` until `expiration`.
    async fn put(&self, key: &Key, content_type: u32, expiration_unix_secs: u64, payload: &[u8]);

    /// Look up cached hits for `(key, content_type)`. For each hit found,
    /// `on_hit` is invoked with the payload; returning
    /// [`ResultAction::Stop`] ends the scan early. Returns the number of
    /// hits delivered to `on_hit`.
    async fn get(
        &self,
        key: &Key,
        content_type: u32,
        on_hit: &mut (dyn FnMut(&[u8]) -> ResultAction + Send),
    ) -> usize;
}

/// Liveness / RTT measurement (spec §4.1 `pingPeer`/`pongNotify`).
#[async_trait]
pub trait PingPong: Send + Sync {
    /// Send a ping to `peer`. The implementation is expected to eventually
    /// report a pong back through whatever channel updates `PeerEntry`
    /// activity — this call only triggers the probe.
    async fn ping(&self, peer: &PeerId);
}

/// Peer-HELLO directory (spec §4.1 `consider`).
#[async_trait]
pub trait Identity: Send + Sync {
    /// Whether a HELLO (public key + address) is already known for `peer`.
    async fn has_hello(&self, peer: &PeerId) -> bool;
}

/// Counters sink. Every call is fire-and-forget; this crate never reads
/// counters back.
pub trait Stats: Send + Sync {
    /// Increment a named counter by `delta`.
    fn increment(&self, name: &'static str, delta: u64);
}

/// Delivery target for a locally-originated GET (spec §4.2 RESULT handling:
/// "if its sink is a local subscriber ... deliver the payload upcalls-style
/// and set `received_flag`"). The `sink` handle is whatever the caller
/// passed to `Routing::handle_get` as a [`crate::route_table::RouteTarget::Local`].
#[async_trait]
pub trait LocalSink: Send + Sync {
    /// Deliver one RESULT payload to the subscriber identified by `sink`.
    async fn deliver(&self, sink: u64, key: &Key, content_type: u32, payload: &[u8]);
}
