//! Broadcasting this node's leadership transitions to local subscribers.
//!
//! Grounded directly on the teacher's own `Server`, which holds an `mpb::MPB<ServerState>` so every
//! interested thread can observe `Start`/`Started`/`Stop`/`Stopped`/`Timeout`/`Error` lifecycle
//! transitions without polling. [`NodeEvent`] is the same idea applied to Raft role transitions:
//! operators, metrics sinks, or integration tests subscribe once and receive every subsequent
//! transition, with no risk of missing one between a poll and the next.

use mpb::MPB;

use crate::registry::NodeId;

/// A leadership transition this node observed in itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// This node just became leader for `term`.
    BecameLeader {
        /// The term in which leadership was won.
        term: u64,
    },
    /// This node is now a follower, of `leader` if known, as of `term`.
    BecameFollower {
        /// The current term.
        term: u64,
        /// The node this one currently believes is leader, if any.
        leader: Option<NodeId>,
    },
}

/// A many-to-many broadcast of this node's [`NodeEvent`]s, one independent receiver per
/// subscriber — exactly [`mpb::MPB`]'s contract, specialized to this crate's event type.
pub struct EventBus {
    bus: MPB<NodeEvent>,
}

impl EventBus {
    /// Constructs a fresh, subscriber-less event bus.
    pub fn new() -> Self {
        Self { bus: MPB::new() }
    }

    /// Subscribes to future events, returning a receiver that sees every event published after
    /// this call (not before it).
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<NodeEvent> {
        self.bus.receiver()
    }

    /// Publishes `event` to every current subscriber.
    pub fn publish(&self, event: NodeEvent) {
        let _ = self.bus.sender().send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the last leadership state observed, so [`ClusterNode`](crate::cluster::ClusterNode) can
/// detect a transition (rather than re-publishing the unchanged state on every tick) without
/// needing a dedicated hook inside the `raft` crate's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipSnapshot {
    pub(crate) term: u64,
    pub(crate) is_leader: bool,
    pub(crate) leader: Option<NodeId>,
}

impl LeadershipSnapshot {
    /// A snapshot matching no real state, so the very first observation always looks like a
    /// transition.
    pub fn unknown() -> Self {
        Self {
            term: u64::MAX,
            is_leader: false,
            leader: None,
        }
    }

    /// Returns the [`NodeEvent`] to publish if `self` differs from `current` in a way that
    /// matters, or `None` if nothing changed.
    pub fn diff(&self, current: &Self) -> Option<NodeEvent> {
        if self == current {
            return None;
        }
        Some(if current.is_leader {
            NodeEvent::BecameLeader { term: current.term }
        } else {
            NodeEvent::BecameFollower {
                term: current.term,
                leader: current.leader,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn subscriber_receives_published_events() {
        let bus = EventBus::new();
        let receiver = bus.subscribe();
        bus.publish(NodeEvent::BecameLeader { term: 1 });
        let event = receiver.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event, NodeEvent::BecameLeader { term: 1 });
    }

    #[test]
    fn every_subscriber_gets_its_own_copy() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(NodeEvent::BecameFollower {
            term: 2,
            leader: None,
        });
        assert_eq!(
            a.recv_timeout(Duration::from_secs(1)).unwrap(),
            NodeEvent::BecameFollower {
                term: 2,
                leader: None
            }
        );
        assert_eq!(
            b.recv_timeout(Duration::from_secs(1)).unwrap(),
            NodeEvent::BecameFollower {
                term: 2,
                leader: None
            }
        );
    }

    #[test]
    fn diff_is_none_for_identical_snapshots() {
        let snapshot = LeadershipSnapshot {
            term: 1,
            is_leader: true,
            leader: None,
        };
        assert_eq!(snapshot.diff(&snapshot.clone()), None);
    }

    #[test]
    fn diff_reports_becoming_leader() {
        let before = LeadershipSnapshot::unknown();
        let after = LeadershipSnapshot {
            term: 1,
            is_leader: true,
            leader: None,
        };
        assert_eq!(before.diff(&after), Some(NodeEvent::BecameLeader { term: 1 }));
    }
}
