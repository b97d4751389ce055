//! [`ClusterNode`]: the concrete, non-generic assembly of the Raft state machine with the bus
//! overlay components, grounded on the teacher's own `cluster::node::ClusterNode` and
//! `cluster::peer::Peer` — both of which already commit to one concrete `RaftNode` type alias
//! rather than threading `Log`/`Random`/`NodeId` generics out to the caller.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;

use rand::rngs::OsRng;

use raft::log::memory::InMemoryLog;
use raft::message::{Message, SendableMessage};
use raft::node::Node;

use crate::atomic_swap::AtomicSwap;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::dedup::{DuplicateKey, DuplicateRequestDetector, Retention};
use crate::error::BusError;
use crate::events::{EventBus, LeadershipSnapshot, NodeEvent};
use crate::handlers::MessageHandlerList;
use crate::registry::{AllowedNetworks, MemberRegistry, NodeId};
use crate::transport::{Endpoint, Transport};
use crate::wire::{ApplicationRequest, ApplicationResponse, DeliveryMode, MetadataResponse};

/// The concrete Raft node type every [`ClusterNode`] runs: an in-memory log, the operating
/// system's RNG for randomized election timeouts, and this crate's [`NodeId`].
type RaftNode = Node<InMemoryLog, OsRng, NodeId>;

/// One cluster member: the Raft state machine plus every piece of the bus overlay needed to drive
/// it — the member registry, duplicate detector, ACL, local handler list, and a transport to reach
/// the rest of the group.
///
/// All mutable Raft state lives behind a single [`Mutex`], the same granularity the teacher's
/// `raft` demos use (one state machine, one lock, ticked and fed by whatever thread owns the
/// lock at the moment) — the individual overlay components (registry, dedup, ACL, handlers) are
/// each independently lock-free or fine-grained, so only actual state-machine transitions
/// contend on the coarse lock.
pub struct ClusterNode {
    id: NodeId,
    address: SocketAddr,
    config: Config,
    raft: Mutex<RaftNode>,
    registry: Arc<MemberRegistry>,
    dedup: Arc<DuplicateRequestDetector>,
    acl: Arc<AllowedNetworks>,
    handlers: Arc<MessageHandlerList>,
    transport: Arc<dyn Transport>,
    lifecycle: CancelToken,
    metadata: AtomicSwap<MetadataResponse>,
    events: EventBus,
    last_leadership: Mutex<LeadershipSnapshot>,
}

impl ClusterNode {
    /// Constructs a node with the given identity, initial peer set, and configuration, and
    /// registers it with `transport` under its own id.
    ///
    /// The Raft peer set is fixed at construction, per [`Node::new`]; membership changes beyond
    /// that are out of scope (see [`raft::core`]'s joint-consensus hooks for the seam a future
    /// implementation would use).
    pub fn new(
        id: NodeId,
        address: SocketAddr,
        peers: BTreeSet<NodeId>,
        config: Config,
        tick_interval: std::time::Duration,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let raft_config = config.to_raft_config(tick_interval);
        let mut raft = Node::new(id, peers.clone(), InMemoryLog::new_unbounded(), OsRng, raft_config);
        raft.start();

        let registry = Arc::new(MemberRegistry::new());
        registry.add_member(id, address, false);

        let node = Arc::new(Self {
            id,
            address,
            config: config.clone(),
            raft: Mutex::new(raft),
            registry,
            dedup: Arc::new(DuplicateRequestDetector::new(Retention::MaxEntries(
                config.duplicate_detector_capacity,
            ))),
            acl: Arc::new(AllowedNetworks::new(config.allowed_networks.clone())),
            handlers: Arc::new(MessageHandlerList::new()),
            transport,
            lifecycle: CancelToken::new(),
            metadata: AtomicSwap::new(MetadataResponse::new()),
            events: EventBus::new(),
            last_leadership: Mutex::new(LeadershipSnapshot::unknown()),
        });

        node.transport.register(id, node.clone() as Arc<dyn Endpoint>);
        node
    }

    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The address this node advertises to peers.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The member registry tracking this node's peers.
    pub fn registry(&self) -> &Arc<MemberRegistry> {
        &self.registry
    }

    /// The local application-message handler list.
    pub fn handlers(&self) -> &Arc<MessageHandlerList> {
        &self.handlers
    }

    /// The ingress ACL.
    pub fn acl(&self) -> &Arc<AllowedNetworks> {
        &self.acl
    }

    /// The transport used to reach remote peers.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Returns whether this node currently believes itself to be the leader.
    pub fn is_leader(&self) -> bool {
        self.raft.lock().expect("raft lock poisoned").is_leader()
    }

    /// Returns the currently known leader's id, if any.
    pub fn leader(&self) -> Option<NodeId> {
        self.raft
            .lock()
            .expect("raft lock poisoned")
            .leader()
            .0
            .copied()
    }

    /// The node's lifecycle token: cancelling it unwinds every in-flight request and background
    /// loop linked to it via [`CancelToken::linked_child`].
    pub fn lifecycle(&self) -> &CancelToken {
        &self.lifecycle
    }

    /// Subscribes to this node's leadership transitions. The returned receiver sees every
    /// [`NodeEvent`] published after this call, starting with none of the history before it.
    pub fn subscribe_events(&self) -> crossbeam_channel::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Shuts the node down: cancels the lifecycle token and deregisters from the transport.
    pub fn shutdown(&self) {
        self.lifecycle.cancel();
        self.transport.unregister(&self.id);
    }

    /// Advances the Raft state machine's internal clock by one tick, dispatching any resulting
    /// messages. Must be called at the fixed interval passed to [`Self::new`] as `tick_interval`.
    pub fn tick(&self) {
        let outgoing: Vec<_> = {
            let mut raft = self.raft.lock().expect("raft lock poisoned");
            raft.timer_tick().collect()
        };
        self.dispatch_outgoing(outgoing);
    }

    /// Submits `data` for replication through this node. Only succeeds while this node is leader;
    /// otherwise the caller should route the request to the known leader (see
    /// [`crate::router`]).
    pub fn client_request(&self, data: bytes::Bytes) -> Result<(), BusError> {
        let outgoing: Vec<_> = {
            let mut raft = self.raft.lock().expect("raft lock poisoned");
            match raft.append(data) {
                Ok(messages) => messages.collect(),
                Err(_) => return Err(BusError::LeaderUnavailable),
            }
        };
        self.dispatch_outgoing(outgoing);
        Ok(())
    }

    /// Advisory, non-mutating pre-vote check; see [`raft::core::State::pre_vote`].
    pub fn pre_vote(
        &self,
        next_term: raft::message::TermId,
        last_log_idx: raft::message::LogIndex,
        last_log_term: raft::message::TermId,
    ) -> (raft::message::TermId, bool) {
        self.raft
            .lock()
            .expect("raft lock poisoned")
            .pre_vote(next_term, last_log_idx, last_log_term)
    }

    /// Steps down to follower if currently leader.
    pub fn resign(&self) -> bool {
        let (resigned, outgoing) = {
            let mut raft = self.raft.lock().expect("raft lock poisoned");
            let (resigned, messages) = raft.resign();
            (resigned, messages.collect::<Vec<_>>())
        };
        self.dispatch_outgoing(outgoing);
        resigned
    }

    /// Produces this node's discovery broadcast.
    pub fn announce(&self) -> SendableMessage<NodeId> {
        self.raft.lock().expect("raft lock poisoned").announce()
    }

    /// Broadcasts a discovery [`Announce`](raft::message::Announce) to every known peer.
    pub fn broadcast_announce(&self) {
        let message = self.announce();
        self.dispatch_outgoing(vec![message]);
    }

    fn dispatch_outgoing(&self, messages: Vec<SendableMessage<NodeId>>) {
        for sendable in messages {
            match sendable.dest {
                raft::message::MessageDestination::Broadcast => {
                    for peer in self.registry.members() {
                        if peer.id != self.id {
                            self.send_to(peer.id, sendable.message.clone());
                        }
                    }
                }
                raft::message::MessageDestination::To(to) => {
                    self.send_to(to, sendable.message.clone());
                }
            }
        }
        self.sync_registry_progress();
    }

    /// Mirrors the Raft state machine's per-peer replication progress into the [`MemberRegistry`],
    /// which owns it for read-only observers (metrics, operators) per the registry's data-model
    /// contract. A writer only while this node is Leader; stepping down clears it for everyone.
    fn sync_registry_progress(&self) {
        let raft = self.raft.lock().expect("raft lock poisoned");
        if raft.is_leader() {
            for peer in raft.peers().clone() {
                if let Some(replication) = raft.replication_state(&peer) {
                    self.registry.set_progress(
                        &peer,
                        replication.next_idx,
                        replication.match_idx,
                        replication.inflight.is_some() || replication.snapshot_inflight.is_some(),
                    );
                }
            }
        } else {
            self.registry.reset_progress();
        }
        drop(raft);
        self.publish_leadership_change();
    }

    /// Publishes a [`NodeEvent`] if this node's leadership state changed since the last call.
    fn publish_leadership_change(&self) {
        let current = {
            let raft = self.raft.lock().expect("raft lock poisoned");
            let (leader, term) = raft.leader();
            LeadershipSnapshot {
                term: term.id,
                is_leader: raft.is_leader(),
                leader: leader.copied(),
            }
        };
        let mut last = self.last_leadership.lock().expect("leadership lock poisoned");
        if let Some(event) = last.diff(&current) {
            self.events.publish(event);
        }
        *last = current;
    }

    fn send_to(&self, to: NodeId, message: Message) {
        if let Err(err) = self.transport.send_raft(to, self.id, message) {
            log::warn!("failed to deliver raft message to {}: {}", to, err);
        }
    }

    /// Returns a snapshot of this node's operator-set metadata.
    pub fn metadata(&self) -> MetadataResponse {
        (*self.metadata.load()).clone()
    }

    /// Replaces this node's operator-set metadata.
    pub fn set_metadata(&self, metadata: MetadataResponse) {
        self.metadata.store(metadata);
    }

    /// Builds the duplicate-detection key for an inbound application request.
    pub(crate) fn duplicate_key(request: &ApplicationRequest) -> DuplicateKey {
        DuplicateKey::new(request.sender_id.to_string(), request.message_id.clone())
    }

    /// Returns whether `request` was already seen within the dedup retention window, recording it
    /// if not.
    pub(crate) fn is_duplicate(&self, request: &ApplicationRequest) -> bool {
        self.dedup.is_duplicate(Self::duplicate_key(request))
    }
}

impl Endpoint for ClusterNode {
    fn receive_raft(&self, message: Message, from: NodeId) {
        self.registry.touch(&from);
        let outgoing: Vec<_> = {
            let mut raft = self.raft.lock().expect("raft lock poisoned");
            raft.receive(message, from).collect()
        };
        self.dispatch_outgoing(outgoing);
    }

    fn receive_application(
        &self,
        request: ApplicationRequest,
    ) -> Result<ApplicationResponse, BusError> {
        if self.is_duplicate(&request) {
            return Ok(ApplicationResponse::Accepted);
        }
        if request.respect_leadership && !self.is_leader() {
            return Err(BusError::LeaderUnavailable);
        }
        match request.mode {
            DeliveryMode::RequestReply => self.handlers.dispatch(request),
            DeliveryMode::OneWay => {
                self.handlers.dispatch(request)?;
                Ok(ApplicationResponse::Accepted)
            }
            DeliveryMode::OneWayNoAck => {
                // Fast-ack: write the 204 immediately and run the handler afterwards. A failure here
                // is logged, never surfaced — the caller already moved on.
                let handlers = self.handlers.clone();
                let name = request.name.clone();
                thread::spawn(move || {
                    if let Err(err) = handlers.dispatch(request) {
                        log::warn!("one-way (no-ack) handler for {} failed: {}", name, err);
                    }
                });
                Ok(ApplicationResponse::Accepted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn single_node_cluster_becomes_leader_after_enough_ticks() {
        let transport = Arc::new(ChannelTransport::new());
        let id = NodeId::generate();
        let node = ClusterNode::new(
            id,
            addr(9001),
            BTreeSet::new(),
            Config {
                election_timeout_range: Duration::from_millis(10)..Duration::from_millis(20),
                ..Config::default()
            },
            Duration::from_millis(10),
            transport,
        );

        for _ in 0..10 {
            node.tick();
        }

        assert!(node.is_leader());
    }

    #[test]
    fn leader_accepts_client_requests_and_follower_does_not() {
        let transport = Arc::new(ChannelTransport::new());
        let id = NodeId::generate();
        let node = ClusterNode::new(
            id,
            addr(9002),
            BTreeSet::new(),
            Config {
                election_timeout_range: Duration::from_millis(10)..Duration::from_millis(20),
                ..Config::default()
            },
            Duration::from_millis(10),
            transport,
        );
        for _ in 0..10 {
            node.tick();
        }
        assert!(node.client_request(bytes::Bytes::from_static(b"hello")).is_ok());
    }

    #[test]
    fn becoming_leader_publishes_an_event() {
        let transport = Arc::new(ChannelTransport::new());
        let id = NodeId::generate();
        let node = ClusterNode::new(
            id,
            addr(9004),
            BTreeSet::new(),
            Config {
                election_timeout_range: Duration::from_millis(10)..Duration::from_millis(20),
                ..Config::default()
            },
            Duration::from_millis(10),
            transport,
        );
        let events = node.subscribe_events();

        for _ in 0..10 {
            node.tick();
        }

        let became_leader = std::iter::from_fn(|| events.recv_timeout(Duration::from_secs(1)).ok())
            .take(10)
            .any(|event| matches!(event, NodeEvent::BecameLeader { .. }));
        assert!(became_leader);
    }

    #[test]
    fn duplicate_application_requests_are_suppressed() {
        let transport = Arc::new(ChannelTransport::new());
        let id = NodeId::generate();
        let node = ClusterNode::new(
            id,
            addr(9003),
            BTreeSet::new(),
            Config::default(),
            Duration::from_millis(10),
            transport,
        );
        let request = ApplicationRequest {
            sender_id: NodeId::generate(),
            message_id: "abc".into(),
            mode: DeliveryMode::OneWay,
            respect_leadership: false,
            name: "noop".into(),
            content_type: "text/plain".into(),
            payload: bytes::Bytes::new(),
        };
        assert!(!node.is_duplicate(&request));
        assert!(node.is_duplicate(&request));
    }
}
