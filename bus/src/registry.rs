//! The set of known peers: identity, address, liveness, and (while this node is Leader) per-peer
//! replication progress.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use ipnet::IpNet;
use raft::message::LogIndex;
use uuid::Uuid;

use crate::atomic_swap::AtomicSwap;

/// An opaque 128-bit node identifier, assigned at startup and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Generates a new random node id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A snapshot of one peer's identity, address, and liveness, as seen by the [`MemberRegistry`].
///
/// `next_idx`/`match_idx` are meaningful only while the local node is Leader; they are `None`
/// otherwise (the registry clears them on every role change via [`MemberRegistry::reset_progress`]).
#[derive(Debug, Clone)]
pub struct Member {
    /// The peer's id.
    pub id: NodeId,
    /// The peer's network address.
    pub address: SocketAddr,
    /// Whether this entry describes a remote peer (`false` only for the local node's own entry).
    pub is_remote: bool,
    /// Milliseconds since the Unix epoch at which this peer was last heard from.
    pub last_contact_millis: u64,
    /// Leader-only: the next [`LogIndex`](raft::message::LogIndex) to send this peer.
    pub next_idx: Option<LogIndex>,
    /// Leader-only: the highest index known to be replicated to this peer.
    pub match_idx: Option<LogIndex>,
    /// Leader-only: whether a replication RPC to this peer is currently unacknowledged.
    pub inflight: bool,
}

struct MemberEntry {
    address: SocketAddr,
    is_remote: bool,
    last_contact_millis: AtomicU64,
    next_idx: AtomicU64,
    match_idx: AtomicU64,
    has_progress: std::sync::atomic::AtomicBool,
    inflight: std::sync::atomic::AtomicBool,
}

/// The set of known peers.
///
/// `touch` is lock-free: it only ever performs an atomic store to the target member's liveness
/// timestamp, so it never blocks a concurrent `add_member`/`remove_member`. Enumeration and
/// `try_get` clone small [`Member`] snapshots out from behind a [`RwLock`], so readers never block a
/// writer and vice versa for more than the instant it takes to clone the map's keys.
pub struct MemberRegistry {
    members: RwLock<BTreeMap<NodeId, Arc<MemberEntry>>>,
}

impl MemberRegistry {
    /// Constructs an empty registry.
    pub fn new() -> Self {
        Self {
            members: RwLock::new(BTreeMap::new()),
        }
    }

    /// Adds or replaces the entry for `id`.
    pub fn add_member(&self, id: NodeId, address: SocketAddr, is_remote: bool) {
        let entry = Arc::new(MemberEntry {
            address,
            is_remote,
            last_contact_millis: AtomicU64::new(0),
            next_idx: AtomicU64::new(0),
            match_idx: AtomicU64::new(0),
            has_progress: std::sync::atomic::AtomicBool::new(false),
            inflight: std::sync::atomic::AtomicBool::new(false),
        });
        self.members
            .write()
            .expect("registry lock poisoned")
            .insert(id, entry);
    }

    /// Removes the entry for `id`, if present.
    pub fn remove_member(&self, id: &NodeId) {
        self.members.write().expect("registry lock poisoned").remove(id);
    }

    /// Returns a snapshot of the member `id`, if known.
    pub fn try_get(&self, id: &NodeId) -> Option<Member> {
        self.members
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .map(|entry| to_member(*id, entry))
    }

    /// Returns whether `id` is a known member.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.members.read().expect("registry lock poisoned").contains_key(id)
    }

    /// Returns a snapshot of every known member.
    pub fn members(&self) -> Vec<Member> {
        self.members
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(id, entry)| to_member(*id, entry))
            .collect()
    }

    /// Records that `id` was just heard from. The liveness signal for every successfully parsed
    /// inbound RPC whose sender is known. A no-op if `id` is not a known member.
    pub fn touch(&self, id: &NodeId) {
        if let Some(entry) = self.members.read().expect("registry lock poisoned").get(id) {
            entry
                .last_contact_millis
                .store(now_millis(), Ordering::Relaxed);
        }
    }

    /// Leader-only: records replication progress for `id`.
    pub fn set_progress(&self, id: &NodeId, next_idx: LogIndex, match_idx: LogIndex, inflight: bool) {
        if let Some(entry) = self.members.read().expect("registry lock poisoned").get(id) {
            entry.next_idx.store(next_idx.id, Ordering::Relaxed);
            entry.match_idx.store(match_idx.id, Ordering::Relaxed);
            entry.inflight.store(inflight, Ordering::Relaxed);
            entry.has_progress.store(true, Ordering::Relaxed);
        }
    }

    /// Clears replication progress for every member, e.g. on stepping down from Leader.
    pub fn reset_progress(&self) {
        for entry in self.members.read().expect("registry lock poisoned").values() {
            entry.has_progress.store(false, Ordering::Relaxed);
            entry.inflight.store(false, Ordering::Relaxed);
        }
    }
}

impl Default for MemberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn to_member(id: NodeId, entry: &MemberEntry) -> Member {
    let has_progress = entry.has_progress.load(Ordering::Relaxed);
    Member {
        id,
        address: entry.address,
        is_remote: entry.is_remote,
        last_contact_millis: entry.last_contact_millis.load(Ordering::Relaxed),
        next_idx: has_progress.then(|| LogIndex {
            id: entry.next_idx.load(Ordering::Relaxed),
        }),
        match_idx: has_progress.then(|| LogIndex {
            id: entry.match_idx.load(Ordering::Relaxed),
        }),
        inflight: entry.inflight.load(Ordering::Relaxed),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}

/// An immutable set of CIDR blocks used as an ingress allow-list for the RPC dispatcher.
///
/// An empty list means "no restriction": every remote address is allowed. Replacement is atomic via
/// [`AtomicSwap`] — a reader never observes a partially-updated list.
pub struct AllowedNetworks {
    networks: AtomicSwap<Vec<IpNet>>,
}

impl AllowedNetworks {
    /// Constructs an allow-list from the given networks. An empty `Vec` disables the ACL.
    pub fn new(networks: Vec<IpNet>) -> Self {
        Self {
            networks: AtomicSwap::new(networks),
        }
    }

    /// Atomically replaces the allow-list.
    pub fn replace(&self, networks: Vec<IpNet>) {
        self.networks.store(networks);
    }

    /// Returns whether `addr` is permitted: either the list is empty, or `addr` matches at least one
    /// configured network.
    pub fn allows(&self, addr: std::net::IpAddr) -> bool {
        let networks = self.networks.load();
        networks.is_empty() || networks.iter().any(|net| net.contains(&addr))
    }
}

impl Default for AllowedNetworks {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn try_get_returns_none_for_unknown_member() {
        let registry = MemberRegistry::new();
        assert!(registry.try_get(&NodeId::generate()).is_none());
    }

    #[test]
    fn add_then_try_get_round_trips() {
        let registry = MemberRegistry::new();
        let id = NodeId::generate();
        registry.add_member(id, addr(7000), true);

        let member = registry.try_get(&id).expect("member should exist");
        assert_eq!(member.address, addr(7000));
        assert!(member.is_remote);
        assert_eq!(member.last_contact_millis, 0);
    }

    #[test]
    fn touch_updates_last_contact_without_touching_other_fields() {
        let registry = MemberRegistry::new();
        let id = NodeId::generate();
        registry.add_member(id, addr(7000), true);

        registry.touch(&id);
        let member = registry.try_get(&id).expect("member should exist");
        assert!(member.last_contact_millis > 0);
    }

    #[test]
    fn touch_on_unknown_member_is_a_no_op() {
        let registry = MemberRegistry::new();
        registry.touch(&NodeId::generate());
    }

    #[test]
    fn remove_member_forgets_the_entry() {
        let registry = MemberRegistry::new();
        let id = NodeId::generate();
        registry.add_member(id, addr(7000), true);
        registry.remove_member(&id);
        assert!(registry.try_get(&id).is_none());
    }

    #[test]
    fn progress_is_none_until_set_and_reset_clears_it() {
        let registry = MemberRegistry::new();
        let id = NodeId::generate();
        registry.add_member(id, addr(7000), true);
        assert!(registry.try_get(&id).unwrap().next_idx.is_none());

        registry.set_progress(&id, LogIndex::from(5), LogIndex::from(3), true);
        let member = registry.try_get(&id).unwrap();
        assert_eq!(member.next_idx, Some(LogIndex::from(5)));
        assert_eq!(member.match_idx, Some(LogIndex::from(3)));
        assert!(member.inflight);

        registry.reset_progress();
        assert!(!registry.try_get(&id).unwrap().inflight);
    }

    #[test]
    fn empty_allow_list_allows_everything() {
        let acl = AllowedNetworks::default();
        assert!(acl.allows(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn non_empty_allow_list_rejects_addresses_outside_it() {
        let acl = AllowedNetworks::new(vec!["10.0.0.0/8".parse().unwrap()]);
        assert!(acl.allows(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(!acl.allows(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
    }

    #[test]
    fn replace_is_atomic_from_a_reader_perspective() {
        let acl = AllowedNetworks::new(vec!["10.0.0.0/8".parse().unwrap()]);
        acl.replace(vec!["192.168.0.0/16".parse().unwrap()]);
        assert!(!acl.allows(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(acl.allows(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
    }
}
