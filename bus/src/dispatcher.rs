//! The RPC dispatcher: the single entry point inbound requests pass through before reaching
//! either the Raft state machine or the message bus overlay, applying the ACL check, membership
//! check, and liveness touch the wire format prescribes for every inbound request regardless of
//! kind.

use std::net::IpAddr;

use raft::message::Message;

use crate::cluster::ClusterNode;
use crate::error::{BusError, StatusCode};
use crate::registry::NodeId;
use crate::transport::Endpoint;
use crate::wire::{ApplicationRequest, ApplicationResponse, MessageKind, MetadataResponse};

/// Dispatches inbound requests of every [`MessageKind`] to a single [`ClusterNode`], exactly as
/// prescribed by the status-code table: ACL check, then membership check, then kind-specific
/// handling, then an unconditional liveness touch.
pub struct RpcDispatcher {
    node: std::sync::Arc<ClusterNode>,
}

impl RpcDispatcher {
    /// Constructs a dispatcher in front of `node`.
    pub fn new(node: std::sync::Arc<ClusterNode>) -> Self {
        Self { node }
    }

    /// Dispatches one of the five Raft RPC kinds (`RequestVote`, `PreVote`, `AppendEntries`,
    /// `InstallSnapshot`) or a `Resign` request.
    ///
    /// `sender`, if known, is the peer the message claims to be from — absent only for discovery
    /// traffic (`Announce`) from an address not yet added to the registry.
    pub fn dispatch_raft(
        &self,
        remote_addr: IpAddr,
        sender: Option<NodeId>,
        kind: MessageKind,
        message: Message,
    ) -> StatusCode {
        if !self.node.acl().allows(remote_addr) {
            return StatusCode::Forbidden;
        }

        let status = match kind {
            MessageKind::RequestVote
            | MessageKind::PreVote
            | MessageKind::AppendEntries
            | MessageKind::InstallSnapshot => match sender {
                Some(from) if self.node.registry().contains(&from) => {
                    self.node.receive_raft(message, from);
                    StatusCode::Ok
                }
                _ => StatusCode::NotFound,
            },
            MessageKind::Resign => {
                self.node.resign();
                StatusCode::Ok
            }
            MessageKind::Metadata | MessageKind::Custom => StatusCode::BadRequest,
        };

        if let Some(from) = sender {
            self.node.registry().touch(&from);
        }
        status
    }

    /// Dispatches an `Announce` broadcast: unlike the other Raft kinds this never requires a
    /// known sender, since its purpose is to let an as-yet-unknown peer be discovered.
    pub fn dispatch_announce(&self, remote_addr: IpAddr, from: NodeId, message: Message) -> StatusCode {
        if !self.node.acl().allows(remote_addr) {
            return StatusCode::Forbidden;
        }
        self.node.receive_raft(message, from);
        self.node.registry().touch(&from);
        StatusCode::Ok
    }

    /// Dispatches a `Metadata` request, returning this node's operator-set metadata.
    pub fn dispatch_metadata(&self, remote_addr: IpAddr, sender: Option<NodeId>) -> Result<MetadataResponse, StatusCode> {
        if !self.node.acl().allows(remote_addr) {
            return Err(StatusCode::Forbidden);
        }
        if let Some(from) = sender {
            if !self.node.registry().contains(&from) {
                return Err(StatusCode::NotFound);
            }
            self.node.registry().touch(&from);
        }
        Ok(self.node.metadata())
    }

    /// Dispatches a `Custom` application message to the local handler list.
    ///
    /// # Errors
    ///
    /// Returns the [`BusError`] the node or handler produced; its
    /// [`status_code`](BusError::status_code) is the wire status to write.
    pub fn dispatch_application(
        &self,
        remote_addr: IpAddr,
        request: ApplicationRequest,
    ) -> Result<ApplicationResponse, BusError> {
        if !self.node.acl().allows(remote_addr) {
            return Err(BusError::Forbidden);
        }
        if !self.node.registry().contains(&request.sender_id) {
            return Err(BusError::UnknownSender);
        }

        let sender = request.sender_id;
        let result = self.node.receive_application(request);
        self.node.registry().touch(&sender);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transport::ChannelTransport;
    use crate::wire::DeliveryMode;
    use bytes::Bytes;
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::time::Duration;

    fn dispatcher() -> (RpcDispatcher, Arc<ClusterNode>) {
        let transport = Arc::new(ChannelTransport::new());
        let node = ClusterNode::new(
            NodeId::generate(),
            "127.0.0.1:9100".parse().unwrap(),
            BTreeSet::new(),
            Config::default(),
            Duration::from_millis(10),
            transport,
        );
        (RpcDispatcher::new(node.clone()), node)
    }

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn blocked_network_yields_403() {
        let (dispatcher, node) = dispatcher();
        node.acl().replace(vec!["10.0.0.0/8".parse().unwrap()]);
        let status = dispatcher.dispatch_raft(
            loopback(),
            Some(NodeId::generate()),
            MessageKind::RequestVote,
            Message {
                term: 0u64.into(),
                rpc: None,
            },
        );
        assert_eq!(status, StatusCode::Forbidden);
    }

    #[test]
    fn application_message_from_unknown_sender_is_rejected() {
        let (dispatcher, _node) = dispatcher();
        let request = ApplicationRequest {
            sender_id: NodeId::generate(),
            message_id: "1".into(),
            mode: DeliveryMode::OneWay,
            respect_leadership: false,
            name: "noop".into(),
            content_type: "text/plain".into(),
            payload: Bytes::new(),
        };
        assert_eq!(
            dispatcher.dispatch_application(loopback(), request),
            Err(BusError::UnknownSender)
        );
    }

    #[test]
    fn application_message_from_known_sender_without_a_handler_is_not_implemented() {
        let (dispatcher, node) = dispatcher();
        let sender = NodeId::generate();
        node.registry().add_member(sender, "127.0.0.1:9200".parse().unwrap(), true);
        let request = ApplicationRequest {
            sender_id: sender,
            message_id: "1".into(),
            mode: DeliveryMode::OneWay,
            respect_leadership: false,
            name: "noop".into(),
            content_type: "text/plain".into(),
            payload: Bytes::new(),
        };
        assert_eq!(
            dispatcher.dispatch_application(loopback(), request),
            Err(BusError::NotImplemented)
        );
    }

    #[test]
    fn metadata_request_returns_the_local_snapshot() {
        let (dispatcher, node) = dispatcher();
        let mut metadata = MetadataResponse::new();
        metadata.insert("region".into(), "eu-west".into());
        node.set_metadata(metadata.clone());
        assert_eq!(dispatcher.dispatch_metadata(loopback(), None), Ok(metadata));
    }
}
