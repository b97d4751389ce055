//! The options table recognized by the bus overlay, translated into the lower-level knobs the
//! [`raft`] crate and this crate's own components actually take.
//!
//! Loading these fields from a file or environment is explicitly out of scope here (see the
//! teacher's own `src/cluster` module, which never grew a config loader either) — callers construct
//! a [`Config`] from whatever source they like and pass it in.

use std::net::SocketAddr;
use std::ops::Range;
use std::time::Duration;

use ipnet::IpNet;

use crate::registry::NodeId;
use crate::replication::BufferingOptions;

/// Every option the bus overlay recognizes, per the wire configuration table.
#[derive(Debug, Clone)]
pub struct Config {
    /// The randomized range a follower picks its election timeout from, to avoid split votes.
    pub election_timeout_range: Range<Duration>,

    /// How often a leader sends a heartbeat to each peer.
    pub heartbeat_interval: Duration,

    /// The per-request deadline for the five Raft RPCs (distinct from an application message's
    /// caller-supplied cancellation token).
    pub raft_rpc_timeout: Duration,

    /// The CIDR allow-list for inbound RPC ingress. Empty disables the ACL.
    pub allowed_networks: Vec<IpNet>,

    /// When set, inbound `AppendEntries`/`InstallSnapshot` payloads are buffered before being handed
    /// to the log (see [`replication`](crate::replication)). `None` streams them straight through.
    pub buffering_options: Option<BufferingOptions>,

    /// How many recently seen `(sender, messageId)` pairs the duplicate-request detector retains.
    pub duplicate_detector_capacity: usize,

    /// This node's identity. Generated if absent.
    pub member_id: Option<NodeId>,

    /// The maximum size, in bytes, of an `AppendEntries` batch — passed straight through to
    /// [`raft::node::Config::replication_chunk_size`].
    pub replication_chunk_size: usize,

    /// The address this node listens on for inbound RPCs.
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Translates [`election_timeout_range`](Self::election_timeout_range) and
    /// [`heartbeat_interval`](Self::heartbeat_interval) into the tick-counted
    /// [`raft::node::Config`] the inner state machine actually runs on, given the fixed real-time
    /// interval between [`timer_tick`](raft::node::Node::timer_tick) calls.
    ///
    /// `tick_interval` must be the same value the caller's tick driver actually uses — see the
    /// doc comment on [`raft::node::Node`] about choosing one.
    pub fn to_raft_config(&self, tick_interval: Duration) -> raft::node::Config {
        let ticks = |d: Duration| -> u32 {
            let ticks = d.as_secs_f64() / tick_interval.as_secs_f64();
            (ticks.ceil() as u32).max(1)
        };
        raft::node::Config {
            election_timeout_ticks: ticks(self.election_timeout_range.start),
            heartbeat_interval_ticks: ticks(self.heartbeat_interval),
            replication_chunk_size: self.replication_chunk_size,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            election_timeout_range: Duration::from_millis(150)..Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            raft_rpc_timeout: Duration::from_secs(5),
            allowed_networks: Vec::new(),
            buffering_options: None,
            duplicate_detector_capacity: 4096,
            member_id: None,
            replication_chunk_size: 64 * 1024,
            listen_addr: "127.0.0.1:8686".parse().expect("valid default listen address"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_tick_ratio() {
        let config = Config::default();
        let raft_config = config.to_raft_config(Duration::from_millis(10));
        assert!(raft_config.election_timeout_ticks >= 15);
        assert!(raft_config.heartbeat_interval_ticks >= 5);
        assert!(raft_config.heartbeat_interval_ticks < raft_config.election_timeout_ticks);
    }

    #[test]
    fn sub_tick_durations_round_up_to_at_least_one_tick() {
        let config = Config {
            heartbeat_interval: Duration::from_millis(1),
            ..Config::default()
        };
        let raft_config = config.to_raft_config(Duration::from_millis(10));
        assert_eq!(raft_config.heartbeat_interval_ticks, 1);
    }
}
