use super::Delegate;
use super::types::{GossipConfig, GossipMessage, Node, NodeId, NodeState};
use crate::error::{FleetError, Result};
use crate::leader;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{oneshot, watch};
use tracing::info;

/// Largest user payload accepted by [`MembershipService::send_to`].
pub const MAX_DATAGRAM_SIZE: usize = 65_000;
const MAX_HEALTH_SCORE: u32 = 8;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    pub(crate) config: GossipConfig,
    socket: Arc<UdpSocket>,
    pub(crate) listener: Mutex<Option<TcpListener>>,
    incarnation: AtomicU64,
    seq: AtomicU64,
    health: AtomicU32,
    pending_acks: DashMap<u64, oneshot::Sender<()>>,
    relays: Arc<DashMap<u64, (SocketAddr, u64)>>,
    pub(crate) delegate: Arc<dyn Delegate>,
    // Serializes liveness transitions with state merges.
    event_lock: Mutex<()>,
    shutdown: watch::Sender<bool>,
    leaving: AtomicBool,
}

impl MembershipService {
    /// Binds the UDP socket and the push/pull TCP listener on the same port.
    ///
    /// Address-in-use errors are retried; anything else is fatal immediately.
    pub async fn new(config: GossipConfig, delegate: Arc<dyn Delegate>) -> Result<Arc<Self>> {
        let (socket, listener) = bind_transport(config.bind_addr, config.bind_attempts).await?;
        let bound = socket.local_addr()?;
        let addr = config.advertise_addr.unwrap_or(bound);

        let local_node = Node {
            id: config.name.clone(),
            addr,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };
        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        info!("Node {} bound gossip transport on {}", local_node.id, bound);

        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            local_node,
            members,
            config,
            socket: Arc::new(socket),
            listener: Mutex::new(Some(listener)),
            incarnation: AtomicU64::new(1),
            seq: AtomicU64::new(0),
            health: AtomicU32::new(0),
            pending_acks: DashMap::new(),
            relays: Arc::new(DashMap::new()),
            delegate,
            event_lock: Mutex::new(()),
            shutdown,
            leaving: AtomicBool::new(false),
        }))
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service...");

        let service = self.clone();
        tokio::spawn(async move {
            service.probe_loop().await;
        });

        let service = self.clone();
        tokio::spawn(async move {
            service.receive_loop().await;
        });

        let service = self.clone();
        tokio::spawn(async move {
            service.failure_detection_loop().await;
        });

        let service = self.clone();
        tokio::spawn(async move {
            service.push_pull_loop().await;
        });

        let service = self.clone();
        tokio::spawn(async move {
            service.accept_loop().await;
        });

        tracing::info!("All background tasks started");
    }

    pub fn name(&self) -> &NodeId {
        &self.local_node.id
    }

    /// Sorted names of all live members, including ourselves.
    pub fn members(&self) -> Vec<NodeId> {
        let mut names: Vec<NodeId> = self
            .members
            .iter()
            .filter(|entry| entry.value().state.is_live())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn member_count(&self) -> usize {
        self.members
            .iter()
            .filter(|entry| entry.value().state.is_live())
            .count()
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state.is_live())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Live members other than ourselves.
    pub fn live_peers(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.key() != self.name() && entry.value().state.is_live())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    /// Awareness score: 0 is healthy, higher means our probes keep failing.
    pub fn health(&self) -> u32 {
        self.health.load(Ordering::Relaxed)
    }

    pub fn am_leader(&self) -> bool {
        leader::is_leader(self.name(), &self.members())
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::SeqCst)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Fire-and-forget unicast of an application payload.
    pub async fn send_to(&self, node: &Node, payload: Vec<u8>) -> Result<()> {
        let msg = GossipMessage::User {
            from: self.name().clone(),
            payload,
        };
        let encoded = bincode::serialize(&msg)?;
        if encoded.len() > MAX_DATAGRAM_SIZE {
            return Err(FleetError::DatagramTooLarge {
                size: encoded.len(),
                limit: MAX_DATAGRAM_SIZE,
            });
        }
        self.socket.send_to(&encoded, node.addr).await?;
        Ok(())
    }

    /// Announces our departure to every live peer, then stops all loops.
    ///
    /// The announcement is bounded by `timeout`.
    pub async fn leave(&self, timeout: Duration) {
        self.leaving.store(true, Ordering::SeqCst);
        let incarnation = self.incarnation.fetch_add(1, Ordering::SeqCst) + 1;

        let msg = GossipMessage::Dead {
            node_id: self.name().clone(),
            incarnation,
        };
        if tokio::time::timeout(timeout, self.broadcast_message(msg))
            .await
            .is_err()
        {
            tracing::warn!("Leave announcement timed out after {:?}", timeout);
        }

        info!("Node {} left the cluster", self.name());
        self.shutdown();
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Applies a change to one member entry and fires join/leave callbacks
    /// when its liveness flips.
    ///
    /// `decide` receives the current entry (if any) and returns the new entry,
    /// or `None` to leave the table untouched.
    pub(crate) fn apply<F>(&self, id: &NodeId, decide: F) -> bool
    where
        F: FnOnce(Option<&Node>) -> Option<Node>,
    {
        let _guard = self.event_lock.lock();

        let previous = self.members.get(id).map(|entry| entry.value().clone());
        let Some(next) = decide(previous.as_ref()) else {
            return false;
        };

        let was_live = previous.as_ref().is_some_and(|node| node.state.is_live());
        let is_live = next.state.is_live();
        self.members.insert(id.clone(), next.clone());

        if !was_live && is_live {
            info!("Node {} joined at {}", next.id, next.addr);
            self.delegate.notify_join(&next);
            tracing::info!("Cluster size now: {} alive nodes", self.member_count());
        } else if was_live && !is_live {
            info!("Node {} is gone", next.id);
            self.delegate.notify_leave(&next);
            tracing::info!("Cluster size now: {} alive nodes", self.member_count());
        }

        true
    }

    /// Hands a remote state snapshot to the delegate together with the current
    /// live set, under the same lock as liveness transitions.
    pub(crate) fn merge_state(&self, snapshot: &[u8]) {
        let _guard = self.event_lock.lock();
        let live: Vec<NodeId> = self.live_peers().into_iter().map(|node| node.id).collect();
        self.delegate.merge_remote_state(snapshot, &live);
    }

    /// Current view of ourselves, including any refuted incarnation.
    pub(crate) fn local_snapshot(&self) -> Node {
        self.get_member(self.name())
            .unwrap_or_else(|| self.local_node.clone())
    }

    pub(crate) fn all_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn touch(&self, id: &NodeId) {
        if let Some(mut member) = self.members.get_mut(id) {
            if member.state != NodeState::Dead {
                member.last_seen = Some(Instant::now());
            }
        }
    }

    fn raise_health(&self) {
        let _ = self
            .health
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |h| {
                Some((h + 1).min(MAX_HEALTH_SCORE))
            });
    }

    fn lower_health(&self) {
        let _ = self
            .health
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |h| {
                Some(h.saturating_sub(1))
            });
    }

    fn random_peers(&self, count: usize, exclude: &NodeId) -> Vec<Node> {
        let mut peers: Vec<Node> = self
            .live_peers()
            .into_iter()
            .filter(|node| &node.id != exclude)
            .collect();
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(count);
        peers
    }

    async fn probe_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.probe_interval);
        let mut shutdown = self.shutdown_signal();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }

            let target = {
                let peers = self.live_peers();
                match peers.choose(&mut rand::thread_rng()) {
                    Some(node) => node.clone(),
                    None => continue,
                }
            };

            self.probe(target).await;
        }

        tracing::debug!("Probe loop stopped");
    }

    /// Direct ping, then indirect pings through other peers, then suspicion.
    async fn probe(&self, target: Node) {
        let seq = self.next_seq();
        let (tx, mut rx) = oneshot::channel();
        self.pending_acks.insert(seq, tx);

        let ping = GossipMessage::Ping {
            from: self.name().clone(),
            seq,
            incarnation: self.incarnation(),
        };
        self.send_message(&ping, target.addr).await;
        tracing::debug!("Sent ping to {}", target.id);

        let timeout = self.config.probe_timeout;
        let mut acked = matches!(tokio::time::timeout(timeout, &mut rx).await, Ok(Ok(())));

        if !acked {
            let helpers = self.random_peers(self.config.indirect_checks, &target.id);
            for helper in &helpers {
                let req = GossipMessage::PingReq {
                    from: self.name().clone(),
                    seq,
                    target: target.clone(),
                };
                self.send_message(&req, helper.addr).await;
            }
            if !helpers.is_empty() {
                tracing::debug!(
                    "No ack from {}, asked {} peer(s) to probe",
                    target.id,
                    helpers.len()
                );
                acked = matches!(tokio::time::timeout(timeout, &mut rx).await, Ok(Ok(())));
            }
        }

        self.pending_acks.remove(&seq);

        if acked {
            self.lower_health();
            return;
        }

        self.raise_health();
        self.suspect(&target.id).await;
    }

    /// Marks an Alive member Suspect and tells everyone else.
    async fn suspect(&self, id: &NodeId) -> bool {
        let mut incarnation = 0;
        let changed = self.apply(id, |prev| {
            let node = prev?;
            if node.state != NodeState::Alive {
                return None;
            }
            let mut node = node.clone();
            node.state = NodeState::Suspect;
            node.last_seen = Some(Instant::now());
            incarnation = node.incarnation;
            Some(node)
        });

        if changed {
            tracing::warn!("Node {} suspected", id);
            self.broadcast_message(GossipMessage::Suspect {
                node_id: id.clone(),
                incarnation,
            })
            .await;
        }
        changed
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];
        let mut shutdown = self.shutdown_signal();

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracing::debug!("Receive loop stopped");
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping {
                from,
                seq,
                incarnation,
            } => {
                self.handle_ping(from, seq, incarnation, src).await?;
            }

            GossipMessage::Ack {
                from,
                seq,
                incarnation,
                members,
            } => {
                self.handle_ack(from, seq, incarnation, members).await;
            }

            GossipMessage::PingReq { from, seq, target } => {
                self.handle_ping_req(from, seq, target, src).await;
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await;
            }

            GossipMessage::Alive { node } => {
                self.handle_alive(node);
            }

            GossipMessage::Dead {
                node_id,
                incarnation,
            } => {
                self.handle_dead(node_id, incarnation).await;
            }

            GossipMessage::User { from, payload } => {
                self.touch(&from);
                self.delegate.notify_msg(&payload);
            }
        }

        Ok(())
    }

    async fn handle_ping(
        &self,
        from: NodeId,
        seq: u64,
        from_incarnation: u64,
        src: SocketAddr,
    ) -> Result<()> {
        tracing::debug!("Received ping from {}", from);

        if &from != self.name() {
            self.observe(&from, from_incarnation, src);
        }

        let reply = GossipMessage::Ack {
            from: self.name().clone(),
            seq,
            incarnation: self.incarnation(),
            members: self.get_alive_members(),
        };

        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, src).await?;

        tracing::debug!("Sent ack to {}", from);

        Ok(())
    }

    /// Records direct contact from `from`, discovering it if unknown.
    fn observe(&self, from: &NodeId, incarnation: u64, src: SocketAddr) {
        self.apply(from, |prev| match prev {
            None => {
                tracing::info!("Discovered new member via ping: {} at {}", from, src);
                Some(Node {
                    id: from.clone(),
                    addr: src,
                    state: NodeState::Alive,
                    incarnation,
                    last_seen: Some(Instant::now()),
                })
            }
            Some(node) if node.state == NodeState::Dead && incarnation <= node.incarnation => None,
            Some(node) => {
                let mut node = node.clone();
                node.last_seen = Some(Instant::now());
                if incarnation > node.incarnation {
                    node.incarnation = incarnation;
                    node.state = NodeState::Alive;
                }
                Some(node)
            }
        });
    }

    async fn handle_ack(
        &self,
        from: NodeId,
        seq: u64,
        from_incarnation: u64,
        members: Vec<Node>,
    ) {
        tracing::debug!(
            "Received ack from {} (inc={}) with {} members",
            from,
            from_incarnation,
            members.len()
        );

        if let Some((_, waiter)) = self.pending_acks.remove(&seq) {
            let _ = waiter.send(());
        } else if let Some((_, (requester, original_seq))) = self.relays.remove(&seq) {
            let relayed = GossipMessage::Ack {
                from: from.clone(),
                seq: original_seq,
                incarnation: from_incarnation,
                members: Vec::new(),
            };
            self.send_message(&relayed, requester).await;
            tracing::debug!("Relayed ack from {} to {}", from, requester);
        }

        self.touch(&from);

        for member in members {
            self.merge_member(member);
        }
    }

    async fn handle_ping_req(&self, from: NodeId, seq: u64, target: Node, src: SocketAddr) {
        tracing::debug!("{} asked us to probe {}", from, target.id);

        let relay_seq = self.next_seq();
        self.relays.insert(relay_seq, (src, seq));

        let relays = self.relays.clone();
        let expiry = self.config.probe_timeout * 2;
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            relays.remove(&relay_seq);
        });

        let ping = GossipMessage::Ping {
            from: self.name().clone(),
            seq: relay_seq,
            incarnation: self.incarnation(),
        };
        self.send_message(&ping, target.addr).await;
    }

    /// Folds one entry of a remote member table into ours.
    pub(crate) fn merge_member(&self, remote: Node) {
        if &remote.id == self.name() {
            if remote.state != NodeState::Alive && remote.incarnation >= self.incarnation() {
                self.refute(remote.incarnation);
            }
            return;
        }

        self.apply(&remote.id.clone(), |prev| match prev {
            None => {
                if !remote.state.is_live() {
                    return None;
                }
                tracing::info!("Discovered new member: {} at {}", remote.id, remote.addr);
                let mut node = remote;
                node.last_seen = Some(Instant::now());
                Some(node)
            }
            Some(existing) => {
                let mut node = existing.clone();
                if remote.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {}: inc {} -> {}",
                        remote.id,
                        existing.incarnation,
                        remote.incarnation,
                    );
                    node.state = remote.state;
                    node.incarnation = remote.incarnation;
                    node.addr = remote.addr;
                } else if remote.incarnation == existing.incarnation
                    && remote.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!("{} refuted suspicion", remote.id);
                    node.state = NodeState::Alive;
                } else if remote.incarnation == existing.incarnation
                    && remote.state == NodeState::Dead
                    && existing.state != NodeState::Dead
                {
                    node.state = NodeState::Dead;
                } else {
                    return None;
                }
                node.last_seen = Some(Instant::now());
                Some(node)
            }
        });
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) {
        if &node_id == self.name() {
            if incarnation >= self.incarnation() {
                self.refute(incarnation);
                self.broadcast_alive().await;
            }
            return;
        }

        let changed = self.apply(&node_id, |prev| {
            let node = prev?;
            if node.state != NodeState::Alive || incarnation < node.incarnation {
                return None;
            }
            let mut node = node.clone();
            node.state = NodeState::Suspect;
            node.incarnation = incarnation;
            node.last_seen = Some(Instant::now());
            Some(node)
        });

        if changed {
            tracing::info!("Node {} suspected by a peer", node_id);
        } else {
            tracing::debug!("Ignoring suspicion of {} (inc={})", node_id, incarnation);
        }
    }

    fn handle_alive(&self, remote: Node) {
        if &remote.id == self.name() {
            return;
        }

        self.apply(&remote.id.clone(), |prev| match prev {
            None => {
                let mut node = remote;
                node.state = NodeState::Alive;
                node.last_seen = Some(Instant::now());
                Some(node)
            }
            Some(existing) => {
                let newer = remote.incarnation > existing.incarnation;
                let refutes = remote.incarnation == existing.incarnation
                    && existing.state == NodeState::Suspect;
                if !newer && !refutes {
                    return None;
                }
                tracing::info!(
                    "Node {} at {} is now Alive (inc={})",
                    remote.id,
                    remote.addr,
                    remote.incarnation
                );
                let mut node = existing.clone();
                node.state = NodeState::Alive;
                node.incarnation = remote.incarnation;
                node.addr = remote.addr;
                node.last_seen = Some(Instant::now());
                Some(node)
            }
        });
    }

    async fn handle_dead(&self, node_id: NodeId, incarnation: u64) {
        if &node_id == self.name() {
            if !self.leaving.load(Ordering::SeqCst) && incarnation >= self.incarnation() {
                self.refute(incarnation);
                self.broadcast_alive().await;
            }
            return;
        }

        self.apply(&node_id, |prev| {
            let node = prev?;
            if node.state == NodeState::Dead || incarnation < node.incarnation {
                return None;
            }
            let mut node = node.clone();
            node.state = NodeState::Dead;
            node.incarnation = incarnation;
            node.last_seen = Some(Instant::now());
            Some(node)
        });
    }

    /// Handles a join push/pull: the sender is alive whatever we believed.
    pub(crate) async fn handle_join(&self, mut node: Node) {
        if &node.id == self.name() {
            return;
        }
        tracing::info!("Node {} joining cluster at {}", node.id, node.addr);

        node.state = NodeState::Alive;
        node.last_seen = Some(Instant::now());
        let joined = node.clone();
        self.apply(&node.id.clone(), |prev| {
            if let Some(existing) = prev {
                node.incarnation = node.incarnation.max(existing.incarnation);
            }
            Some(node)
        });

        self.broadcast_message(GossipMessage::Alive { node: joined })
            .await;
    }

    /// Bumps our incarnation above `observed` so our Alive claim wins.
    fn refute(&self, observed: u64) {
        if self.leaving.load(Ordering::SeqCst) {
            return;
        }
        let current = self.incarnation();
        let next = current.max(observed) + 1;
        self.incarnation.store(next, Ordering::SeqCst);
        self.raise_health();

        if let Some(mut me) = self.members.get_mut(self.name()) {
            me.incarnation = next;
            me.state = NodeState::Alive;
            me.last_seen = Some(Instant::now());
        }
        tracing::info!("Refuting rumour about ourselves (inc {} -> {})", current, next);
    }

    async fn broadcast_alive(&self) {
        let msg = GossipMessage::Alive {
            node: self.local_snapshot(),
        };
        self.broadcast_message(msg).await;
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.probe_interval);
        let mut shutdown = self.shutdown_signal();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }
            let now = Instant::now();

            // Suspicion itself only comes from failed probes
            let mut to_kill = Vec::new();
            for mut entry in self.members.iter_mut() {
                if entry.key() == self.name() {
                    continue;
                }
                let member = entry.value_mut();
                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);
                if member.state == NodeState::Suspect && elapsed > self.config.dead_timeout {
                    tracing::debug!(
                        "Node {} declared DEAD (no refutation for {:?})",
                        member.id,
                        elapsed
                    );
                    to_kill.push((member.id.clone(), member.incarnation));
                }
            }

            for (id, incarnation) in to_kill {
                self.handle_dead(id.clone(), incarnation).await;
                self.broadcast_message(GossipMessage::Dead {
                    node_id: id,
                    incarnation,
                })
                .await;
            }

            self.reap_dead(now);
        }

        tracing::debug!("Failure detection loop stopped");
    }

    /// Forgets members that have been Dead for longer than `dead_retention`.
    /// Returns how many entries were dropped.
    pub(crate) fn reap_dead(&self, now: Instant) -> usize {
        let expired: Vec<NodeId> = self
            .members
            .iter()
            .filter(|entry| {
                entry.value().state == NodeState::Dead
                    && entry.value().last_seen.is_some_and(|seen| {
                        now.saturating_duration_since(seen) > self.config.dead_retention
                    })
            })
            .map(|entry| entry.key().clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let _guard = self.event_lock.lock();
        let mut reaped = 0;
        for id in expired {
            let removed = self
                .members
                .remove_if(&id, |_, node| node.state == NodeState::Dead);
            if removed.is_some() {
                tracing::debug!("Forgot dead member {}", id);
                reaped += 1;
            }
        }
        reaped
    }

    pub(crate) async fn send_message(&self, msg: &GossipMessage, addr: SocketAddr) {
        match bincode::serialize(msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, addr).await {
                    tracing::warn!("Failed to send to {}: {}", addr, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize gossip message: {}", e),
        }
    }

    pub(crate) async fn broadcast_message(&self, msg: GossipMessage) {
        if let Ok(encoded) = bincode::serialize(&msg) {
            for member in self.live_peers() {
                if let Err(e) = self.socket.send_to(&encoded, member.addr).await {
                    tracing::warn!("Failed to broadcast to {}: {}", member.id, e);
                }
            }
        }
    }
}

async fn bind_transport(addr: SocketAddr, attempts: usize) -> Result<(UdpSocket, TcpListener)> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match try_bind(addr).await {
            Ok(pair) => return Ok(pair),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!("Bind attempt {} on {} failed: {}", attempt, addr, e);
                last_error = Some(e);
                tokio::time::sleep(BIND_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(FleetError::Bind {
                    addr,
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }

    Err(FleetError::Bind {
        addr,
        attempts,
        source: last_error
            .unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::AddrInUse)),
    })
}

async fn try_bind(addr: SocketAddr) -> std::io::Result<(UdpSocket, TcpListener)> {
    let socket = UdpSocket::bind(addr).await?;
    let listener = TcpListener::bind(socket.local_addr()?).await?;
    Ok((socket, listener))
}
