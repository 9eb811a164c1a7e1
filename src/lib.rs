//! Kademlia-style DHT peer table and stateful GET/PUT/RESULT request router.
//!
//! This crate implements the core described in spec §1: a self-maintaining
//! neighbor table over a 512-bit identifier space, a probabilistic
//! forwarding algorithm bounded by an estimated network diameter, a
//! routing-record table with bounded capacity and expiration, and
//! loop-suppression using circulating Bloom filters embedded in every
//! message. Encrypted transport, peer authentication, content storage,
//! liveness checking, peer-HELLO lookup, and counters are all consumed as
//! external collaborators (see [`collaborators`]) — this crate owns none of
//! them, and has no CLI or config-file surface of its own. A hosting daemon
//! wires concrete implementations in through [`init`].

pub mod bloom;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod id;
pub mod maintenance;
pub mod peer_table;
pub mod route_table;
pub mod routing;
pub mod wire;

pub use collaborators::{Core, DStore, Identity, LocalSink, PingPong, ResultAction, Stats};
pub use config::Config;
pub use error::{BucketError, CoreError, WireError};
pub use id::{Key, PeerId};
pub use routing::Routing;

use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running DHT core instance: the routing state plus a handle on its
/// background maintenance task.
pub struct Handle {
    pub routing: Arc<Routing>,
    maintenance: JoinHandle<()>,
}

impl Handle {
    #[must_use]
    pub fn routing(&self) -> &Arc<Routing> {
        &self.routing
    }
}

/// Initialize a DHT core instance with the given `local_id`, `config`, and
/// collaborator implementations, and start its maintenance task.
///
/// There is no CLI surface owned by this subsystem (spec §6): the hosting
/// daemon is expected to call this once at startup and hold onto the
/// returned [`Handle`] for the process lifetime, routing inbound wire
/// messages to `Handle::routing`'s `handle_get`/`handle_put`/`route_result`.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn init(
    local_id: PeerId,
    config: Config,
    core: Arc<dyn Core>,
    dstore: Arc<dyn DStore>,
    pingpong: Arc<dyn PingPong>,
    identity: Arc<dyn Identity>,
    stats: Arc<dyn Stats>,
    local_sink: Arc<dyn LocalSink>,
) -> Handle {
    let interval = config.maintain_interval;
    let routing = Arc::new(Routing::new(
        local_id, config, core, dstore, pingpong, identity, stats, local_sink,
    ));
    let maintenance = maintenance::spawn(Arc::clone(&routing), interval);
    tracing::info!(%local_id, "dht core initialized");
    Handle { routing, maintenance }
}

/// Stop the background maintenance task. Any GET/PUT/RESULT calls already
/// in flight against `handle.routing` complete normally; no new maintenance
/// sweeps run afterward.
pub fn shutdown(handle: Handle) {
    handle.maintenance.abort();
    tracing::info!("dht core shut down");
}
