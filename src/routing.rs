//! The GET/PUT/RESULT state machine (spec §4.2).
//!
//! `Routing` owns the single global core mutex (spec §5): every mutation of
//! the peer table, its buckets, or the routing-record table happens while
//! holding it. Unicasts happen through the `Core` collaborator while the
//! lock is held, per spec's requirement that the transport never re-enters
//! the core synchronously.

use crate::bloom::{hash_payload, PathBloom};
use crate::collaborators::{Core, DStore, Identity, LocalSink, PingPong, ResultAction, Stats};
use crate::config::Config;
use crate::error::CoreError;
use crate::id::{Key, PeerId};
use crate::peer_table::{ConsiderOutcome, PeerTable};
use crate::route_table::{RouteTable, RouteTarget, SourceRoute};
use crate::wire::Message;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct State {
    peer_table: PeerTable,
    route_table: RouteTable,
}

/// The stateful request router. One instance per local DHT identity.
pub struct Routing {
    local_id: PeerId,
    config: Config,
    state: Mutex<State>,
    core: Arc<dyn Core>,
    dstore: Arc<dyn DStore>,
    pingpong: Arc<dyn PingPong>,
    identity: Arc<dyn Identity>,
    stats: Arc<dyn Stats>,
    local_sink: Arc<dyn LocalSink>,
}

/// Deterministic part of `forward_count`: `target_value` is the smallest
/// integer not less than `target_count` (i.e. `ceil`, computed the way
/// `get_forward_count` does it — incrementing from zero rather than calling
/// into a float-ceil routine), plus the leftover `target_count + 1 -
/// target_value` the caller compares against one uniform draw.
fn forward_count_shape(hop_count: u32, tries: u32, diameter: u32) -> (u32, f64) {
    let denom = f64::from(tries) * f64::from(hop_count + 1) + f64::from(diameter);
    let target_count = if denom <= 0.0 { f64::from(tries) } else { f64::from(tries) / denom };
    let mut target_value = 0u32;
    while f64::from(target_value) < target_count {
        target_value += 1;
    }
    (target_value, target_count + 1.0 - f64::from(target_value))
}

/// `forward_count(h, t) = ceil(t / (t*(h+1) + diameter))`, incremented once
/// more if `target_count + 1 - target_value` exceeds one uniform `[0,1)`
/// draw, capped at `tries` (spec §4.2 step 5 / SPEC_FULL.md "SUPPLEMENTED
/// FEATURES", ported from `routing.c`'s `get_forward_count`).
#[must_use]
pub fn forward_count(hop_count: u32, tries: u32, diameter: u32, draw: f64) -> u32 {
    let (target_value, leftover) = forward_count_shape(hop_count, tries, diameter);
    let value = if leftover > draw { target_value + 1 } else { target_value };
    value.min(tries)
}

fn unix_secs_from(offset: std::time::Duration) -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (now + offset).as_secs()
}

impl Routing {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        local_id: PeerId,
        config: Config,
        core: Arc<dyn Core>,
        dstore: Arc<dyn DStore>,
        pingpong: Arc<dyn PingPong>,
        identity: Arc<dyn Identity>,
        stats: Arc<dyn Stats>,
        local_sink: Arc<dyn LocalSink>,
    ) -> Self {
        let peer_table = PeerTable::new(local_id, &config);
        let route_table = RouteTable::new(config.table_size, config.bloom_size, config.bloom_k);
        Self {
            local_id,
            config,
            state: Mutex::new(State {
                peer_table,
                route_table,
            }),
            core,
            dstore,
            pingpong,
            identity,
            stats,
            local_sink,
        }
    }

    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// `PeerTable.consider(S, S)`, driving whatever follow-up (HELLO
    /// request, DISCOVERY, or ping) the peer table's decision requires.
    async fn consider_sender(&self, sender: &PeerId) {
        let known_hello = self.identity.has_hello(sender).await;
        let connected = self.core.is_connected(sender).await;
        let outcome = {
            let mut state = self.state.lock().await;
            state
                .peer_table
                .consider(sender, *sender, known_hello, connected, Instant::now())
        };
        match outcome {
            ConsiderOutcome::NeedsHello => {
                let ask = Message::AskHello {
                    content_type: 0,
                    hop_count: 0,
                    network_size_hint: 0,
                    peer: *sender,
                };
                if self.core.unicast(sender, &ask).await.is_err() {
                    debug!(peer = %sender, "ask_hello unicast failed");
                }
            }
            ConsiderOutcome::NeedsDiscovery => {
                debug!(peer = %sender, "peer known but not connected, discovery owed");
            }
            ConsiderOutcome::InsertedAndPinged => {
                self.pingpong.ping(sender).await;
            }
            ConsiderOutcome::Dropped | ConsiderOutcome::Rejected(_) => {}
        }
    }

    /// Handle an inbound GET, from either a peer or a local subscriber.
    ///
    /// `source` identifies who to route RESULTs back to; when `sender_peer`
    /// is `Some`, that peer is also offered to the peer table and included
    /// as the SourceRoute's remote target.
    pub async fn handle_get(
        &self,
        source: RouteTarget,
        sender_peer: Option<PeerId>,
        key: Key,
        content_type: u32,
        hop_count: u32,
        mut bloom: PathBloom,
    ) -> Result<(), CoreError> {
        if let Some(sender) = sender_peer {
            self.consider_sender(&sender).await;
        }

        let diameter = {
            let state = self.state.lock().await;
            state.peer_table.estimate_network_diameter()
        };
        if hop_count > 2 * diameter {
            self.stats.increment("get.dropped_diameter", 1);
            warn!(%key, hop_count, diameter, "GET exceeds diameter bound, dropping");
            return Ok(());
        }

        {
            let mut state = self.state.lock().await;
            let inserted = state.route_table.insert_new(
                key,
                content_type,
                hop_count,
                SourceRoute::new(source),
                Instant::now(),
            );
            if !inserted {
                self.stats.increment("get.capacity_exhausted", 1);
                return Err(CoreError::CapacityExhausted);
            }
            if let Some(record) = state.route_table.get_mut(&key, content_type) {
                record.add_source(SourceRoute::new(source));
            }
        }

        let mut local_hits = 0usize;
        {
            let dstore = Arc::clone(&self.dstore);
            let mut collected = Vec::new();
            let max_results = self.config.max_results;
            dstore
                .get(&key, content_type, &mut |payload| {
                    collected.push(payload.to_vec());
                    if collected.len() >= max_results {
                        ResultAction::Stop
                    } else {
                        ResultAction::Continue
                    }
                })
                .await;
            for payload in collected {
                local_hits += 1;
                self.route_result(key, content_type, &payload).await;
            }
        }
        if local_hits >= self.config.max_results {
            return Ok(());
        }

        bloom.add(&self.local_id);
        let draw: f64 = rand::random();
        let target_value = forward_count(hop_count, self.config.get_tries, diameter, draw);

        let mut blocked: Vec<PeerId> = sender_peer.into_iter().collect();
        for _ in 0..target_value {
            let chosen = {
                let state = self.state.lock().await;
                state.peer_table.select_peer(&key, &blocked, &bloom)
            };
            let Some(peer) = chosen else {
                break;
            };
            blocked.push(peer);
            bloom.add(&peer);

            let outbound = Message::Get {
                content_type,
                hop_count: hop_count + 1,
                network_size_hint: 0,
                key: Key::from_bytes(*key.as_bytes()),
                bloom_bytes: bloom.as_bytes().to_vec(),
            };
            if self.core.unicast(&peer, &outbound).await.is_err() {
                self.stats.increment("get.forward_failed", 1);
            }
        }
        Ok(())
    }

    /// Handle an inbound PUT, from either a peer or a local subscriber.
    pub async fn handle_put(
        &self,
        sender_peer: Option<PeerId>,
        key: Key,
        content_type: u32,
        hop_count: u32,
        mut bloom: PathBloom,
        payload: Vec<u8>,
    ) -> Result<(), CoreError> {
        if let Some(sender) = sender_peer {
            self.consider_sender(&sender).await;
        }

        let diameter = {
            let state = self.state.lock().await;
            state.peer_table.estimate_network_diameter()
        };

        bloom.add(&self.local_id);
        let draw: f64 = rand::random();
        let target_value = forward_count(hop_count, self.config.put_tries, diameter, draw);

        let mut blocked: Vec<PeerId> = sender_peer.into_iter().collect();
        for _ in 0..target_value {
            let chosen = {
                let state = self.state.lock().await;
                state.peer_table.select_peer(&key, &blocked, &bloom)
            };
            let Some(peer) = chosen else {
                break;
            };
            blocked.push(peer);
            bloom.add(&peer);

            let outbound = Message::Put {
                content_type,
                hop_count: hop_count + 1,
                network_size_hint: 0,
                key: Key::from_bytes(*key.as_bytes()),
                bloom_bytes: bloom.as_bytes().to_vec(),
                payload: payload.clone(),
            };
            if self.core.unicast(&peer, &outbound).await.is_err() {
                self.stats.increment("put.forward_failed", 1);
            }
        }

        let is_closest = {
            let state = self.state.lock().await;
            state.peer_table.am_closest(&key)
        };
        if is_closest && !payload.is_empty() {
            let expiration = unix_secs_from(self.config.content_lifetime);
            self.dstore.put(&key, content_type, expiration, &payload).await;
        }
        Ok(())
    }

    /// Route a RESULT payload to every matching tracked GET
    /// (spec §4.2 RESULT handling / `route_result`).
    pub async fn route_result(&self, key: Key, content_type: u32, payload: &[u8]) {
        let hc = hash_payload(payload);

        let mut deliveries: Vec<RouteTarget> = Vec::new();
        let mut expired_records = false;
        {
            let mut state = self.state.lock().await;
            for record in state.route_table.records_for_key_mut(&key) {
                if record.content_type != content_type {
                    continue;
                }
                if record.seen_results.contains(&hc) {
                    continue;
                }
                record.seen_results.insert(&hc);
                for source in &mut record.sources {
                    deliveries.push(source.target);
                    source.received = true;
                }
                if record.delivered_count() >= self.config.max_results {
                    record.expired = true;
                    expired_records = true;
                }
            }
        }

        for target in deliveries {
            match target {
                RouteTarget::Remote(peer) => {
                    let reply = Message::Result {
                        content_type,
                        hop_count: 0,
                        network_size_hint: 0,
                        key: Key::from_bytes(*key.as_bytes()),
                        bloom_bytes: vec![0u8; self.config.bloom_size],
                        payload: payload.to_vec(),
                    };
                    if self.core.unicast(&peer, &reply).await.is_err() {
                        self.stats.increment("result.unicast_failed", 1);
                        let fallback = {
                            let state = self.state.lock().await;
                            let blocked = [peer];
                            let bloom = PathBloom::new(self.config.bloom_size, self.config.bloom_k);
                            state.peer_table.select_peer(&key, &blocked, &bloom)
                        };
                        if let Some(fallback_peer) = fallback {
                            let _ = self.core.unicast(&fallback_peer, &reply).await;
                        }
                    }
                }
                RouteTarget::Local(sink) => {
                    self.local_sink.deliver(sink, &key, content_type, payload).await;
                }
            }
        }

        if expired_records {
            let mut state = self.state.lock().await;
            state.route_table.remove_expired();
        }
    }

    /// Cancel a local subscriber's interest (spec §5 `stop(key, type, sink)`).
    pub async fn stop_local(&self, sink: u64) {
        let mut state = self.state.lock().await;
        state.route_table.remove_source_everywhere(RouteTarget::Local(sink));
    }

    /// Run one maintenance sweep: expire stale peers, ping those past the
    /// half-timeout mark, and return all known peers (the maintenance task
    /// uses this to decide who gets a DISCOVERY advertisement).
    pub async fn maintenance_tick(&self) -> Vec<PeerId> {
        let now = Instant::now();
        let ping_threshold = self.config.ping_threshold();
        let (to_ping, all_peers) = {
            let mut state = self.state.lock().await;
            let to_ping = state.peer_table.expire_and_collect_ping_targets(now, ping_threshold);
            for peer in &to_ping {
                state.peer_table.mark_pinged(peer, now);
            }
            (to_ping, state.peer_table.all_peers())
        };
        for peer in &to_ping {
            self.pingpong.ping(peer).await;
        }
        all_peers
    }

    /// Build and send a DISCOVERY advertisement to `recipient`, biased
    /// toward it and capped at `ADV_CAP` peer ids (spec §4.1 maintenance
    /// task).
    pub async fn advertise_to(&self, recipient: &PeerId) -> Result<(), CoreError> {
        let discovery = self.build_discovery(recipient).await;
        self.core.unicast(recipient, &discovery).await
    }

    /// Build a DISCOVERY advertisement biased toward `recipient`, containing
    /// up to `ADV_CAP` peer ids (spec §4.1).
    pub async fn build_discovery(&self, recipient: &PeerId) -> Message {
        let mut blocked = vec![*recipient];
        let mut peers = Vec::new();
        let bloom = PathBloom::new(self.config.bloom_size, self.config.bloom_k);
        let state = self.state.lock().await;
        for _ in 0..self.config.adv_cap {
            let Some(peer) = state.peer_table.select_peer(recipient, &blocked, &bloom) else {
                break;
            };
            blocked.push(peer);
            peers.push(peer);
        }
        Message::Discovery {
            content_type: 0,
            hop_count: 0,
            network_size_hint: 0,
            space_available: (self.config.bucket_size as u32).saturating_sub(peers.len() as u32),
            peers,
        }
    }
}
