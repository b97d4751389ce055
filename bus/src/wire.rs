//! Request/response shapes for the seven inbound message kinds.
//!
//! The five Raft RPCs travel as plain [`raft::message::Message`] values, `prost`-encoded by the
//! inner crate. This module adds the two kinds the `raft` crate knows nothing about: `Metadata`
//! and `Custom` (application messages). These are plain in-process value types, not wire-encoded
//! here — actual framing/serialization for them is the out-of-scope transport layer's concern
//! (see [`crate::transport`]), so they carry no `prost` derives of their own.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::registry::NodeId;

/// Selects which handler an inbound request is routed to. Carried in the transport's message-kind
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A real election vote request.
    RequestVote,
    /// An advisory, non-mutating vote request.
    PreVote,
    /// A log replication request.
    AppendEntries,
    /// A snapshot installation request.
    InstallSnapshot,
    /// A request for the local leader to step down.
    Resign,
    /// A request for this node's operator-set metadata.
    Metadata,
    /// An application message routed through the leader router.
    Custom,
}

/// How an application message should be delivered and acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Send to the leader and await a response message.
    RequestReply,
    /// Send to the leader; the caller is acknowledged once the leader accepts the message, not once
    /// it finishes processing.
    OneWay,
    /// Fire-and-forget: the receiver acknowledges before processing and any failure is only logged.
    OneWayNoAck,
}

/// An inbound application (`Custom`) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRequest {
    /// The node or client that originated this message.
    pub sender_id: NodeId,
    /// Unique per sender for the duplicate-detector's retention window.
    pub message_id: String,
    /// The delivery mode the sender asked for.
    pub mode: DeliveryMode,
    /// If set, a non-leader receiver must answer `ServiceUnavailable` rather than execute the
    /// message.
    pub respect_leadership: bool,
    /// The application-defined message name, used to find a handler that claims support for it.
    pub name: String,
    /// The MIME type of [`payload`](Self::payload), opaque to this crate.
    pub content_type: String,
    /// The opaque message payload.
    pub payload: Bytes,
}

/// The outcome of handling an [`ApplicationRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationResponse {
    /// A `RequestReply` response payload, written with status 200.
    Reply {
        /// The MIME type of [`payload`](Self::Reply::payload).
        content_type: String,
        /// The opaque response payload.
        payload: Bytes,
    },
    /// A `OneWay`/`OneWayNoAck` acknowledgement, written with status 204.
    Accepted,
}

/// The reply to a `Metadata` request: the operator-set key/value map for the responding node.
pub type MetadataResponse = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn application_request_carries_a_stable_dedup_key_across_clones() {
        let request = ApplicationRequest {
            sender_id: NodeId(Uuid::nil()),
            message_id: "abc".into(),
            mode: DeliveryMode::OneWay,
            respect_leadership: false,
            name: "ping".into(),
            content_type: "application/octet-stream".into(),
            payload: Bytes::new(),
        };
        let cloned = request.clone();
        assert_eq!(request.sender_id, cloned.sender_id);
        assert_eq!(request.message_id, cloned.message_id);
    }
}
