use std::time::Duration;

use crate::message::Message;

/// Invoked with the correlated response (or the failure that ended the
/// wait). One-shot requests see exactly one call; observe requests may see
/// one call per notification, which is why this is `Fn` and not `FnOnce`.
pub type ResponseHandler = std::sync::Arc<dyn Fn(Result<Message, ChannelError>) + Send + Sync>;

/// Failures a request channel can report to its callers.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ChannelError {
    /// The link is currently down (mid-reconnect); the send was not queued.
    #[error("channel {0} is not established")]
    Unavailable(String),
    /// The pending entry expired before a response arrived.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The channel closed while the send was in flight.
    #[error("channel closed")]
    Closed,
}

/// Looks up live channels by their logical sibling name. Implemented by the
/// connector pool; resources depend on this seam so tests can substitute
/// fakes instead of dialing sockets.
pub trait ChannelSource: Send + Sync {
    fn channel(&self, name: &str) -> Option<std::sync::Arc<dyn RequestChannel>>;
}

/// A place requests can be written to: a pool connection to a sibling
/// service, or (for replies and notifications) the session's own peer.
///
/// Passed into resources explicitly so tests can substitute fakes; nothing
/// in the stack reaches for a process-wide channel registry.
pub trait RequestChannel: Send + Sync {
    /// Logical name, e.g. "account", "rd", "mq".
    fn name(&self) -> &str;

    /// Send a request and register `on_response` under the message token.
    fn send_request(&self, request: Message, on_response: ResponseHandler)
        -> Result<(), ChannelError>;

    /// Fire-and-forget send with no response correlation. Used for the
    /// teardown unsubscribe cascade, where the originator is already gone.
    fn send_oneway(&self, request: Message) -> Result<(), ChannelError>;
}
