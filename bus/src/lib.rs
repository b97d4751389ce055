//! Message bus overlay for a [`raft`] node: member registry, duplicate-request suppression, RPC
//! dispatch, and leader routing for application messages.
//!
//! The [`raft`] crate owns term/vote/role and log replication. This crate wraps a [`raft::node::Node`]
//! with the pieces a networked deployment needs around it: who the peers are and whether they're
//! reachable ([`registry`]), at-most-once delivery for application signals ([`dedup`]), a status-code
//! mapping for inbound requests ([`dispatcher`]), and a retrying router for outbound application
//! messages that always ends up at the current leader ([`router`]).

mod atomic_swap;
pub mod cancel;
pub mod cluster;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handlers;
pub mod registry;
pub mod replication;
pub mod router;
pub mod transport;
pub mod wire;

pub use cluster::ClusterNode;
pub use error::BusError;
