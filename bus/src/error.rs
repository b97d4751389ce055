//! Error kinds surfaced by the bus overlay.

use thiserror::Error;

/// An error produced by the message bus overlay or the RPC dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No leader is currently known.
    #[error("no leader is currently known")]
    LeaderUnavailable,

    /// A transport-level failure talking to a specific peer.
    #[error("peer {0} is unavailable")]
    MemberUnavailable(String),

    /// A peer answered with a status code the dispatcher understands semantically.
    #[error("peer responded with unexpected status {0}")]
    UnexpectedStatus(u16),

    /// No local handler accepted the signal.
    #[error("no handler is registered for this signal")]
    NotImplemented,

    /// The request's cancellation token fired before the operation completed.
    #[error("operation canceled")]
    OperationCanceled,

    /// The remote address did not match any configured allowed network.
    #[error("remote address is not in an allowed network")]
    Forbidden,

    /// The sender is not a known member of the cluster.
    #[error("sender is not a known cluster member")]
    UnknownSender,
}

impl BusError {
    /// Maps this error to the exact wire status code prescribed for it.
    ///
    /// `RequestReply`/`OneWay` retries key off [`BadRequest`](StatusCode::BadRequest) (400) and
    /// [`ServiceUnavailable`](StatusCode::ServiceUnavailable) (503); every other code is terminal for
    /// the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BusError::LeaderUnavailable => StatusCode::ServiceUnavailable,
            BusError::MemberUnavailable(_) => StatusCode::BadRequest,
            BusError::UnexpectedStatus(_) => StatusCode::BadRequest,
            BusError::NotImplemented => StatusCode::NotImplemented,
            BusError::OperationCanceled => StatusCode::BadRequest,
            BusError::Forbidden => StatusCode::Forbidden,
            BusError::UnknownSender => StatusCode::NotFound,
        }
    }
}

/// The wire status codes the RPC dispatcher writes, exactly as prescribed for wire compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success reply.
    Ok = 200,
    /// One-way message accepted.
    NoContent = 204,
    /// Unknown message kind, or malformed payload.
    BadRequest = 400,
    /// Sender is not a cluster member.
    NotFound = 404,
    /// No handler registered for a signal.
    NotImplemented = 501,
    /// Remote address blocked by `AllowedNetworks`.
    Forbidden = 403,
    /// `RespectLeadership` was set and the local node is not the leader.
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// The numeric wire code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_prescribed_wire_values() {
        assert_eq!(StatusCode::Ok.as_u16(), 200);
        assert_eq!(StatusCode::NoContent.as_u16(), 204);
        assert_eq!(StatusCode::BadRequest.as_u16(), 400);
        assert_eq!(StatusCode::NotFound.as_u16(), 404);
        assert_eq!(StatusCode::NotImplemented.as_u16(), 501);
        assert_eq!(StatusCode::Forbidden.as_u16(), 403);
        assert_eq!(StatusCode::ServiceUnavailable.as_u16(), 503);
    }

    #[test]
    fn leader_unavailable_drives_router_retry_via_503() {
        assert_eq!(
            BusError::LeaderUnavailable.status_code(),
            StatusCode::ServiceUnavailable
        );
    }
}
