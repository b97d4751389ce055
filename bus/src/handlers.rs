//! The local application-message handler list: an immutable, copy-on-write ordered list of
//! handlers, the same shape [`mpb::MPB`] uses for its subscriber vector generalized from plain
//! fan-out to "first handler that claims the message wins".

use std::sync::Arc;

use crate::atomic_swap::AtomicSwap;
use crate::error::BusError;
use crate::wire::ApplicationRequest;
use crate::wire::ApplicationResponse;

/// A local handler for application (`Custom`) messages.
///
/// Implementations are tried in subscription order by [`MessageHandlerList::dispatch`]; the first
/// one whose [`is_signal_supported`](Self::is_signal_supported) returns `true` for the message's
/// name receives it.
pub trait MessageHandler: Send + Sync {
    /// Returns whether this handler claims messages with the given application-defined name.
    fn is_signal_supported(&self, name: &str) -> bool;

    /// Handles a claimed request, producing the response to write back to the caller.
    fn handle(&self, request: ApplicationRequest) -> Result<ApplicationResponse, BusError>;
}

/// An immutable, ordered list of [`MessageHandler`]s, published by copy-on-write.
///
/// Subscription and removal clone the underlying `Vec`, append/remove, and publish a fresh
/// snapshot — in-flight [`dispatch`](Self::dispatch) calls that already captured a snapshot via
/// [`AtomicSwap::load`] never observe a torn list, only either the whole old list or the whole new
/// one.
pub struct MessageHandlerList {
    handlers: AtomicSwap<Vec<Arc<dyn MessageHandler>>>,
}

impl MessageHandlerList {
    /// Constructs an empty handler list.
    pub fn new() -> Self {
        Self {
            handlers: AtomicSwap::new(Vec::new()),
        }
    }

    /// Appends `handler`, publishing a new snapshot.
    pub fn add_listener(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.rcu(|current| {
            let mut next = current.clone();
            next.push(handler.clone());
            next
        });
    }

    /// Removes every handler for which `matches` returns `true`, publishing a new snapshot.
    pub fn remove_listener(&self, matches: impl Fn(&Arc<dyn MessageHandler>) -> bool) {
        self.handlers.rcu(|current| {
            current
                .iter()
                .filter(|handler| !matches(handler))
                .cloned()
                .collect()
        });
    }

    /// Dispatches `request` to the first subscribed handler that claims its name, in subscription
    /// order.
    ///
    /// Returns [`BusError::NotImplemented`] if no handler claims the message, which the RPC
    /// dispatcher maps to a 501 response.
    pub fn dispatch(&self, request: ApplicationRequest) -> Result<ApplicationResponse, BusError> {
        let snapshot = self.handlers.load();
        let handler = snapshot
            .iter()
            .find(|handler| handler.is_signal_supported(&request.name))
            .ok_or(BusError::NotImplemented)?;
        handler.handle(request)
    }

    /// Returns whether any subscribed handler claims `name`.
    pub fn supports(&self, name: &str) -> bool {
        self.handlers
            .load()
            .iter()
            .any(|handler| handler.is_signal_supported(name))
    }
}

impl Default for MessageHandlerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeId;
    use bytes::Bytes;
    use uuid::Uuid;

    struct Echo;

    impl MessageHandler for Echo {
        fn is_signal_supported(&self, name: &str) -> bool {
            name == "echo"
        }

        fn handle(&self, request: ApplicationRequest) -> Result<ApplicationResponse, BusError> {
            Ok(ApplicationResponse::Reply {
                content_type: request.content_type,
                payload: request.payload,
            })
        }
    }

    fn request(name: &str) -> ApplicationRequest {
        ApplicationRequest {
            sender_id: NodeId(Uuid::nil()),
            message_id: "1".into(),
            mode: crate::wire::DeliveryMode::RequestReply,
            respect_leadership: false,
            name: name.into(),
            content_type: "text/plain".into(),
            payload: Bytes::from_static(b"hi"),
        }
    }

    #[test]
    fn dispatch_with_no_handlers_is_not_implemented() {
        let list = MessageHandlerList::new();
        assert!(matches!(
            list.dispatch(request("echo")),
            Err(BusError::NotImplemented)
        ));
    }

    #[test]
    fn dispatch_finds_the_claiming_handler() {
        let list = MessageHandlerList::new();
        list.add_listener(Arc::new(Echo));
        let response = list.dispatch(request("echo")).unwrap();
        assert!(matches!(response, ApplicationResponse::Reply { .. }));
    }

    #[test]
    fn dispatch_for_unclaimed_name_is_not_implemented() {
        let list = MessageHandlerList::new();
        list.add_listener(Arc::new(Echo));
        assert!(matches!(
            list.dispatch(request("other")),
            Err(BusError::NotImplemented)
        ));
    }

    #[test]
    fn remove_listener_drops_matching_handlers() {
        let list = MessageHandlerList::new();
        let handler: Arc<dyn MessageHandler> = Arc::new(Echo);
        list.add_listener(handler.clone());
        assert!(list.supports("echo"));
        list.remove_listener(|h| Arc::ptr_eq(h, &handler));
        assert!(!list.supports("echo"));
    }
}
