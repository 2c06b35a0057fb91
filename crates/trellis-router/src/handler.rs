use std::sync::Arc;

use async_trait::async_trait;
use trellis_core::{Message, ResourceError};
use trellis_session::Session;

/// What a handler produced for a request.
#[derive(Debug)]
pub enum Respond {
    /// A synchronous response, written to the session immediately.
    Now(Message),
    /// The handler registered an asynchronous continuation (keyed by the
    /// request token, typically via the connector pool); the final response
    /// will be pushed to the session when it arrives.
    Deferred,
}

/// The contract every endpoint implements.
///
/// Handlers validate, consult the session (identity, subscriptions), and
/// either answer now or defer. Failures are returned as the tagged
/// [`ResourceError`]; the dispatch layer renders them to wire responses, so
/// a handler never builds an error response itself.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Path segments this resource registers under.
    fn uri(&self) -> &[&str];

    async fn handle(
        &self,
        session: &Arc<Session>,
        request: Message,
    ) -> Result<Respond, ResourceError>;
}
