use crate::callbacks::{ClusterCallbacks, NoopCallbacks};
use crate::codec::{read_frame, write_frame};
use crate::credentials::{AllowAll, CredentialsProvider};
use crate::error::{NetError, NetResult};
use crate::transport::{Conn, TcpTransport, Transport};
use pastry_core::{
    LeafSetDump, Message, Node, NodeId, NodeState, NeighborhoodSetDump, Purpose, RoutingTableDump,
    SelfIdentity, StateMask, NODE_ID_DIGITS,
};
use pastry_tools::{get_timestamp, sleep_ms, TickTask};
use parking_lot::RwLock as SyncRwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stop_token::prelude::*;
use stop_token::{StopSource, StopToken};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

/// Addressing and timing parameters a [`Cluster`] needs to run.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub self_id: NodeId,
    pub region: String,
    pub region_penalty: i64,
    pub local_addr: String,
    pub global_addr: String,
    pub bind_addr: SocketAddr,
    pub heartbeat_interval_secs: u32,
    pub network_timeout: Duration,
    /// Opaque bytes attached to every outgoing frame and checked by the
    /// peer's [`CredentialsProvider`]. Empty by default, matching
    /// [`crate::credentials::AllowAll`]'s "accepts everything" contract.
    pub credentials: Vec<u8>,
}

/// The combined routing/leaf/neighborhood dump carried by STAT_DATA,
/// STAT_REQ responses, NODE_REPR responses, and NODE_JOIN responses
/// (which chain dumps backward through the forwarding path).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDump {
    pub routing: Option<RoutingTableDump>,
    pub leaf: Option<LeafSetDump>,
    pub neighborhood: Option<NeighborhoodSetDump>,
    /// Each hop's own record, accumulated as a NODE_JOIN response chains
    /// backward through the forwarding path. Without this the joiner would
    /// only ever learn *table contents*, never the forwarding hops
    /// themselves, and could end up with no one to NODE_ANN.
    pub responders: Vec<Node>,
}

impl StateDump {
    fn merge(&mut self, other: StateDump) {
        if let Some(r) = other.routing {
            self.routing.get_or_insert_with(Default::default).entries.extend(r.entries);
        }
        if let Some(l) = other.leaf {
            self.leaf = Some(l);
        }
        if let Some(n) = other.neighborhood {
            self.neighborhood = Some(n);
        }
        self.responders.extend(other.responders);
    }

    /// Every distinct peer record carried by this dump, skipping the zero
    /// sentinel.
    pub fn all_nodes(&self) -> Vec<Node> {
        let mut out = Vec::new();
        if let Some(r) = &self.routing {
            out.extend(r.entries.iter().cloned());
        }
        if let Some(l) = &self.leaf {
            out.extend(l.left.iter().cloned());
            out.extend(l.right.iter().cloned());
        }
        if let Some(n) = &self.neighborhood {
            out.extend(n.entries.iter().cloned());
        }
        out.extend(self.responders.iter().cloned());
        out.retain(|n| !n.is_zero());
        out
    }
}

struct ClusterInner {
    stop_source: Option<StopSource>,
    accept_jh: Option<JoinHandle<()>>,
    heartbeat_jh: Option<JoinHandle<()>>,
}

struct ClusterUnlockedInner {
    config: ClusterConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialsProvider>,
    callbacks: SyncRwLock<Arc<dyn ClusterCallbacks>>,
    state: NodeState,
    heartbeat_tick: TickTask,
}

/// The protocol engine: connection handling, message dispatch, and the
/// join/repair/heartbeat routines built on top of a [`NodeState`].
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<AsyncMutex<Option<ClusterInner>>>,
    unlocked: Arc<ClusterUnlockedInner>,
}

impl Cluster {
    pub fn new(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialsProvider>,
        callbacks: Arc<dyn ClusterCallbacks>,
    ) -> Self {
        let identity = SelfIdentity::new(config.self_id, config.region.clone(), config.region_penalty);
        let heartbeat_tick = TickTask::new(config.heartbeat_interval_secs);
        Self {
            inner: Arc::new(AsyncMutex::new(None)),
            unlocked: Arc::new(ClusterUnlockedInner {
                config,
                transport,
                credentials,
                callbacks: SyncRwLock::new(callbacks),
                state: NodeState::new(identity),
                heartbeat_tick,
            }),
        }
    }

    /// Convenience constructor wired to plain TCP, an allow-all credential
    /// check, and no-op callbacks; call [`Cluster::register_callbacks`]
    /// before [`Cluster::listen`] to hook in real handlers.
    pub fn with_tcp(config: ClusterConfig) -> Self {
        Self::new(
            config,
            Arc::new(TcpTransport),
            Arc::new(AllowAll),
            Arc::new(NoopCallbacks),
        )
    }

    pub fn register_callbacks(&self, callbacks: Arc<dyn ClusterCallbacks>) {
        *self.unlocked.callbacks.write() = callbacks;
    }

    pub fn state(&self) -> &NodeState {
        &self.unlocked.state
    }

    fn callbacks(&self) -> Arc<dyn ClusterCallbacks> {
        self.unlocked.callbacks.read().clone()
    }

    fn self_node(&self) -> Node {
        let cfg = &self.unlocked.config;
        let mut n = Node::new(
            cfg.self_id,
            cfg.local_addr.clone(),
            cfg.global_addr.clone(),
            cfg.region.clone(),
        );
        n.versions = self.unlocked.state.versions();
        n.last_heard_from = get_timestamp();
        n
    }

    /// Build an outgoing message stamped with this node's own credential
    /// bytes, so a peer running a [`CredentialsProvider`] more restrictive
    /// than [`AllowAll`] doesn't drop every frame this cluster sends.
    fn new_message(&self, purpose: Purpose, key: NodeId, payload: Vec<u8>) -> Message {
        Message::new(purpose, self.self_node(), key, payload)
            .with_credentials(self.unlocked.config.credentials.clone())
    }

    fn addr_for(&self, peer: &Node) -> NetResult<SocketAddr> {
        let addr_str = if peer.region == self.unlocked.config.region {
            &peer.local_addr
        } else {
            &peer.global_addr
        };
        addr_str
            .parse()
            .map_err(|_| NetError::Codec(format!("invalid peer address {addr_str:?}")))
    }

    fn known_peers(&self) -> Vec<Node> {
        let mut out = self.unlocked.state.routing_table.list(None, None);
        let (left, right) = self.unlocked.state.leaf_set.list();
        out.extend(left);
        out.extend(right);
        out.extend(self.unlocked.state.neighborhood_set.list());
        out.sort_by_key(|n| n.id.as_u128());
        out.dedup_by_key(|n| n.id);
        out
    }

    fn insert_into_tables(&self, node: &Node) {
        if node.is_zero() || node.id == self.unlocked.state.self_id() {
            return;
        }
        let _ = self.unlocked.state.routing_table.insert(node.clone());
        let _ = self.unlocked.state.leaf_set.insert(node.clone());
        let _ = self.unlocked.state.neighborhood_set.insert(node.clone());
    }

    /// Like [`Cluster::insert_into_tables`] but only refreshes tables that
    /// already hold `node`, for proximity/last-heard-from updates that
    /// shouldn't newly admit a peer into a table it never qualified for.
    fn refresh_peer(&self, node: &Node) {
        let state = &self.unlocked.state;
        if state.routing_table.get(node.id).is_some() {
            let _ = state.routing_table.insert(node.clone());
        }
        if state.leaf_set.get(node.id).is_some() {
            let _ = state.leaf_set.insert(node.clone());
        }
        if state.neighborhood_set.get(node.id).is_some() {
            let _ = state.neighborhood_set.insert(node.clone());
        }
    }

    async fn remove_peer(&self, id: NodeId) -> bool {
        let state = &self.unlocked.state;
        let removed = state.routing_table.remove(id).is_some()
            | state.leaf_set.remove(id).is_some()
            | state.neighborhood_set.remove(id).is_some();
        if removed {
            self.repair_leaf_set().await;
            self.repair_neighborhood_set().await;
        }
        removed
    }

    fn export_mask(&self, mask: &StateMask) -> StateDump {
        let state = &self.unlocked.state;
        StateDump {
            routing: mask
                .routing
                .then(|| state.routing_table.export(mask.rows.as_deref(), mask.cols.as_deref())),
            leaf: mask.leaf.then(|| state.leaf_set.export()),
            neighborhood: mask.neighborhood.then(|| state.neighborhood_set.export()),
            responders: Vec::new(),
        }
    }

    async fn exchange_at(&self, addr: SocketAddr, msg: Message) -> NetResult<Message> {
        let timeout = self.unlocked.config.network_timeout;
        let mut conn = self.unlocked.transport.dial(addr, timeout).await?;
        write_frame(&mut conn, &msg).await?;
        match tokio::time::timeout(timeout, read_frame(&mut conn)).await {
            Ok(result) => result,
            Err(_) => Err(NetError::DeadNode(format!("{addr}: response timed out"))),
        }
    }

    async fn exchange(&self, peer: &Node, msg: Message) -> NetResult<Message> {
        let addr = self.addr_for(peer)?;
        self.exchange_at(addr, msg).await
    }

    async fn fire_and_forget(&self, peer: &Node, msg: Message) -> NetResult<()> {
        let addr = self.addr_for(peer)?;
        let timeout = self.unlocked.config.network_timeout;
        let mut conn = self.unlocked.transport.dial(addr, timeout).await?;
        write_frame(&mut conn, &msg).await
    }

    /// Leaf-set repair: if either side is thinner than full, ask the
    /// surviving furthest peer on that side for its own leaf set.
    async fn repair_leaf_set(&self) {
        let (left, right) = self.unlocked.state.leaf_set.list();
        for side in [left, right] {
            if side.len() < pastry_core::LEAF_SET_SIDE_SIZE {
                if let Some(furthest) = side.last() {
                    self.request_repair(furthest, StateMask { leaf: true, ..StateMask::none() })
                        .await;
                }
            }
        }
    }

    /// Neighborhood-set repair: ask the closest known peer for its
    /// neighborhood, on the theory that proximity neighborhoods overlap.
    async fn repair_neighborhood_set(&self) {
        let entries = self.unlocked.state.neighborhood_set.list();
        if entries.len() < pastry_core::NEIGHBORHOOD_SET_SIZE {
            if let Some(closest) = entries.first() {
                self.request_repair(
                    closest,
                    StateMask { neighborhood: true, ..StateMask::none() },
                )
                .await;
            }
        }
    }

    async fn request_repair(&self, peer: &Node, mask: StateMask) {
        let payload = match bincode::serialize(&mask) {
            Ok(p) => p,
            Err(_) => return,
        };
        let msg = self.new_message(Purpose::NodeRepr, peer.id, payload);
        match self.exchange(peer, msg).await {
            Ok(resp) => {
                if let Ok(dump) = bincode::deserialize::<StateDump>(&resp.payload) {
                    for node in dump.all_nodes() {
                        self.insert_into_tables(&node);
                    }
                    if mask.leaf {
                        self.callbacks().on_new_leaves(&self.unlocked.state.leaf_set.export());
                    }
                }
            }
            Err(e) => trace!(peer = %peer.id, error = %e, "repair request failed"),
        }
    }

    // ---- dispatch -------------------------------------------------

    async fn dispatch(&self, msg: Message) -> Option<Message> {
        match msg.purpose {
            Purpose::NodeJoin => Some(self.handle_node_join(msg).await),
            Purpose::NodeAnn => self.handle_node_ann(msg).await,
            Purpose::NodeExit => {
                self.handle_node_exit(msg).await;
                None
            }
            Purpose::Heartbeat => Some(self.handle_heartbeat(msg)),
            Purpose::StatData => {
                self.handle_stat_data(msg);
                None
            }
            Purpose::StatReq => Some(self.handle_stat_or_repr(msg)),
            Purpose::NodeRace => {
                self.handle_node_race(msg).await;
                None
            }
            Purpose::NodeRepr => Some(self.handle_stat_or_repr(msg)),
            Purpose::Application(_) => {
                if let Err(e) = self.route_and_deliver(msg).await {
                    self.callbacks().on_error(e.to_string());
                }
                None
            }
        }
    }

    async fn handle_node_join(&self, msg: Message) -> Message {
        let self_id = self.unlocked.state.self_id();
        let r = self_id.prefix_len(&msg.key).min(NODE_ID_DIGITS - 1);
        let rows: Vec<usize> = (0..=r).collect();
        let is_first_hop = msg.hop_count == 0;

        let mut dump = StateDump {
            routing: Some(self.unlocked.state.routing_table.export(Some(&rows), None)),
            leaf: None,
            neighborhood: if is_first_hop {
                Some(self.unlocked.state.neighborhood_set.export())
            } else {
                None
            },
            responders: vec![self.self_node()],
        };

        match self.unlocked.state.router().route(msg.key) {
            Some(peer) => {
                let forwarded = msg.clone().forwarded(&self.self_node());
                if let Ok(resp) = self.exchange(&peer, forwarded).await {
                    if let Ok(downstream) = bincode::deserialize::<StateDump>(&resp.payload) {
                        dump.merge(downstream);
                    }
                }
            }
            None => {
                dump.leaf = Some(self.unlocked.state.leaf_set.export());
            }
        }

        let payload = bincode::serialize(&dump).unwrap_or_default();
        self.new_message(Purpose::StatData, msg.key, payload)
    }

    async fn handle_node_ann(&self, msg: Message) -> Option<Message> {
        self.insert_into_tables(&msg.sender);
        self.callbacks().on_node_join(&msg.sender);

        let mine = self.unlocked.state.versions();
        let announced = msg.sender_versions;
        let mask = StateMask {
            routing: mine.routing > announced.routing,
            leaf: mine.leaf > announced.leaf,
            neighborhood: mine.neighborhood > announced.neighborhood,
            rows: None,
            cols: None,
        };
        if mask.is_empty() {
            return None;
        }
        let dump = self.export_mask(&mask);
        let payload = bincode::serialize(&dump).ok()?;
        Some(self.new_message(Purpose::NodeRace, msg.key, payload))
    }

    async fn handle_node_exit(&self, msg: Message) {
        if self.remove_peer(msg.sender.id).await {
            self.callbacks().on_node_exit(&msg.sender);
        }
    }

    fn handle_heartbeat(&self, msg: Message) -> Message {
        self.new_message(Purpose::Heartbeat, msg.key, Vec::new())
    }

    fn handle_stat_data(&self, msg: Message) {
        let Ok(dump) = bincode::deserialize::<StateDump>(&msg.payload) else {
            return;
        };
        for node in dump.all_nodes() {
            self.insert_into_tables(&node);
        }
    }

    fn handle_stat_or_repr(&self, msg: Message) -> Message {
        let mask = bincode::deserialize::<StateMask>(&msg.payload).unwrap_or_else(|_| StateMask::none());
        let dump = self.export_mask(&mask);
        let payload = bincode::serialize(&dump).unwrap_or_default();
        self.new_message(Purpose::StatData, msg.key, payload)
    }

    async fn handle_node_race(&self, msg: Message) {
        self.handle_stat_data(msg.clone());
        let reannounce = self.new_message(Purpose::NodeAnn, msg.sender.id, Vec::new());
        let _ = self.fire_and_forget(&msg.sender, reannounce).await;
    }

    /// Shared by `send()` and inbound application-purpose messages: route
    /// toward the key and either deliver locally or forward, with one
    /// DeadNode retry.
    async fn route_and_deliver(&self, msg: Message) -> NetResult<()> {
        match self.unlocked.state.router().route(msg.key) {
            None => {
                self.callbacks().on_deliver(&msg);
                Ok(())
            }
            Some(peer) => {
                if !self.callbacks().on_forward(&msg, &peer) {
                    return Ok(());
                }
                let forwarded = msg.clone().forwarded(&self.self_node());
                match self.fire_and_forget(&peer, forwarded).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_dead_node() => {
                        self.remove_peer(peer.id).await;
                        match self.unlocked.state.router().route(msg.key) {
                            None => {
                                self.callbacks().on_deliver(&msg);
                                Ok(())
                            }
                            Some(retry_peer) => {
                                if !self.callbacks().on_forward(&msg, &retry_peer) {
                                    return Ok(());
                                }
                                let retry_msg = msg.forwarded(&self.self_node());
                                self.fire_and_forget(&retry_peer, retry_msg).await
                            }
                        }
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    // ---- public verbs -----------------------------------------------

    #[instrument(level = "debug", skip(self, payload))]
    pub async fn send(&self, tag: u16, key: NodeId, payload: Vec<u8>) -> NetResult<()> {
        let purpose = pastry_core::Purpose::application(tag)?;
        let msg = self.new_message(purpose, key, payload);
        self.route_and_deliver(msg).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn join(&self, seed_addr: SocketAddr) -> NetResult<()> {
        let msg = self.new_message(Purpose::NodeJoin, self.unlocked.state.self_id(), Vec::new());
        let resp = self.exchange_at(seed_addr, msg).await?;
        let dump: StateDump =
            bincode::deserialize(&resp.payload).map_err(|e| NetError::Codec(e.to_string()))?;
        for node in dump.all_nodes() {
            self.insert_into_tables(&node);
        }
        self.announce_self().await;
        Ok(())
    }

    async fn announce_self(&self) {
        for peer in self.known_peers() {
            let msg = self.new_message(Purpose::NodeAnn, peer.id, Vec::new());
            if let Ok(resp) = self.exchange(&peer, msg).await {
                if resp.purpose == Purpose::NodeRace {
                    if let Ok(dump) = bincode::deserialize::<StateDump>(&resp.payload) {
                        for node in dump.all_nodes() {
                            self.insert_into_tables(&node);
                        }
                    }
                    let reannounce = self.new_message(Purpose::NodeAnn, peer.id, Vec::new());
                    let _ = self.fire_and_forget(&peer, reannounce).await;
                }
            }
        }
    }

    async fn handle_connection(&self, mut conn: Box<dyn Conn>) {
        let timeout = self.unlocked.config.network_timeout;
        let msg = match tokio::time::timeout(timeout, read_frame(&mut conn)).await {
            Ok(Ok(m)) => m,
            Ok(Err(e)) => {
                self.callbacks().on_error(e.to_string());
                return;
            }
            Err(_) => {
                self.callbacks().on_error("read timed out".into());
                return;
            }
        };

        if !self.unlocked.credentials.is_valid(&msg.credentials) {
            trace!("dropping message with invalid credentials");
            return;
        }

        if let Some(resp) = self.dispatch(msg).await {
            if let Err(e) = tokio::time::timeout(timeout, write_frame(&mut conn, &resp)).await {
                self.callbacks().on_error(format!("response write timed out: {e}"));
            }
        }
    }

    async fn accept_loop(self, mut listener: Box<dyn crate::transport::Listener>, stop_token: StopToken) {
        loop {
            match listener.accept().timeout_at(stop_token.clone()).await {
                Ok(Ok((conn, _addr))) => {
                    let cluster = self.clone();
                    tokio::spawn(async move { cluster.handle_connection(conn).await });
                }
                Ok(Err(e)) => {
                    self.callbacks().on_error(format!("accept failed: {e}"));
                }
                Err(_) => break,
            }
        }
    }

    async fn heartbeat_loop(self, stop_token: StopToken) {
        let cluster = self.clone();
        self.unlocked.heartbeat_tick.set_routine(move |_last, _now| {
            let cluster = cluster.clone();
            Box::pin(async move { cluster.run_heartbeat_round().await })
        });

        loop {
            if sleep_ms(1000).timeout_at(stop_token.clone()).await.is_err() {
                break;
            }
            if let Err(e) = self.unlocked.heartbeat_tick.tick().await {
                self.callbacks().on_error(e.to_string());
            }
        }
    }

    async fn run_heartbeat_round(&self) -> Result<(), String> {
        for peer in self.known_peers() {
            let t0 = get_timestamp();
            let msg = self.new_message(Purpose::Heartbeat, peer.id, Vec::new());
            match self.exchange(&peer, msg).await {
                Ok(_resp) => {
                    let elapsed = get_timestamp().saturating_sub(t0).as_u64() as i64;
                    let mut updated = peer.clone();
                    updated.raw_proximity = elapsed;
                    updated.last_heard_from = get_timestamp();
                    self.refresh_peer(&updated);
                    self.callbacks().on_heartbeat(&updated);
                }
                Err(e) if e.is_dead_node() => {
                    if self.remove_peer(peer.id).await {
                        self.callbacks().on_node_exit(&peer);
                    }
                }
                Err(e) => {
                    warn!(peer = %peer.id, error = %e, "heartbeat failed");
                }
            }
        }
        Ok(())
    }

    /// Bind and start accepting connections plus the heartbeat ticker.
    #[instrument(level = "debug", skip(self))]
    pub async fn listen(&self) -> NetResult<()> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            panic!("cluster is already listening");
        }

        let stop_source = StopSource::new();
        let stop_token = stop_source.token();
        let listener = self.unlocked.transport.listen(self.unlocked.config.bind_addr).await?;

        let accept_jh = tokio::spawn(self.clone().accept_loop(listener, stop_token.clone()));
        let heartbeat_jh = tokio::spawn(self.clone().heartbeat_loop(stop_token));

        *guard = Some(ClusterInner {
            stop_source: Some(stop_source),
            accept_jh: Some(accept_jh),
            heartbeat_jh: Some(heartbeat_jh),
        });
        debug!(bind_addr = %self.unlocked.config.bind_addr, "cluster listening");
        Ok(())
    }

    async fn teardown(&self) {
        let mut guard = self.inner.lock().await;
        let inner = match guard.take() {
            Some(v) => v,
            None => panic!("cluster is not listening"),
        };
        drop(inner.stop_source);
        if let Some(jh) = inner.accept_jh {
            let _ = jh.await;
        }
        if let Some(jh) = inner.heartbeat_jh {
            let _ = jh.await;
        }
    }

    /// Graceful exit: announce NODE_EXIT to every known peer, then stop.
    #[instrument(level = "debug", skip(self))]
    pub async fn stop(&self) {
        for peer in self.known_peers() {
            let msg = self.new_message(Purpose::NodeExit, peer.id, Vec::new());
            let _ = self.fire_and_forget(&peer, msg).await;
        }
        self.teardown().await;
    }

    /// Ungraceful exit: skip the NODE_EXIT announcement.
    #[instrument(level = "debug", skip(self))]
    pub async fn kill(&self) {
        self.teardown().await;
    }
}
