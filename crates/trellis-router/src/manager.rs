use std::sync::Arc;

use trellis_core::{Message, Status};
use trellis_session::Session;

use crate::handler::{Resource, Respond};
use crate::trie::PathTrie;

/// Routes decoded messages to registered resources and centrally translates
/// every handler error into exactly one wire-level response.
///
/// Built once at startup (registration happens before the manager is shared)
/// and passed to each transport explicitly.
pub struct ResourceManager {
    trie: PathTrie<Arc<dyn Resource>>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self {
            trie: PathTrie::new(),
        }
    }

    /// Register a resource at its own uri.
    pub fn register(&mut self, resource: Arc<dyn Resource>) {
        let uri: Vec<String> = resource.uri().iter().map(|s| s.to_string()).collect();
        if self.trie.register(&uri, resource).is_some() {
            tracing::warn!(uri = ?uri, "Resource registration overwrote an earlier handler");
        }
    }

    pub fn resource_count(&self) -> usize {
        self.trie.len()
    }

    /// Dispatch one inbound request for `session`.
    ///
    /// Returns the response to write now, or `None` when the handler
    /// deferred (its continuation will push the response later). Inbound
    /// non-requests are dropped: on server-side connections only peers'
    /// requests arrive here.
    pub async fn dispatch(&self, session: &Arc<Session>, request: Message) -> Option<Message> {
        if !request.is_request() {
            tracing::debug!(
                session_id = %session.id(),
                token = %request.token,
                "Dropping non-request message"
            );
            return None;
        }

        let Some(resource) = self.trie.resolve(&request.path) else {
            tracing::debug!(uri = %request.uri(), "No resource registered");
            return Some(Message::response_to(&request, Status::NotFound));
        };

        match resource.handle(session, request.clone()).await {
            Ok(Respond::Now(response)) => Some(response),
            Ok(Respond::Deferred) => None,
            Err(err) => {
                tracing::debug!(
                    session_id = %session.id(),
                    uri = %request.uri(),
                    kind = err.error_kind(),
                    error = %err,
                    "Handler error"
                );
                Some(Message::response_to(&request, err.status()))
            }
        }
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}
