use std::sync::Arc;

use async_trait::async_trait;
use trellis_core::{
    ChannelError, ChannelSource, Message, Observe, ResourceError, ResponseHandler, Status, Token,
};
use trellis_router::{Resource, Respond};
use trellis_session::Session;

/// Coarse-grained relay to a named sibling service.
///
/// Registered at a path prefix (the trie's fallback catches every sub-path),
/// it forwards requests over the pool connection preserving the token,
/// appends the caller's identity as query parameters, and carries
/// observation state across the hop: SUBSCRIBE records the relay so the
/// disconnect cascade can reach the sibling, notifications coming back are
/// re-stamped with this session's per-token sequence.
pub struct ProxyResource {
    uri: Vec<&'static str>,
    sibling: String,
    source: Arc<dyn ChannelSource>,
    require_auth: bool,
}

impl ProxyResource {
    pub fn new(uri: &[&'static str], sibling: &str, source: Arc<dyn ChannelSource>) -> Self {
        Self {
            uri: uri.to_vec(),
            sibling: sibling.to_string(),
            source,
            require_auth: true,
        }
    }

    /// Paths reachable before sign-in (account creation, sign-in itself).
    pub fn allow_unauthenticated(mut self) -> Self {
        self.require_auth = false;
        self
    }
}

/// Push one upstream result back to the originating session.
///
/// Notifications are re-stamped from the session's own per-token counter; a
/// NOTHING-marker response is the final word for the token and clears both
/// the observation and relay entries before it is forwarded.
fn relay_response(
    session: &Arc<Session>,
    token: Token,
    sibling: &str,
    result: Result<Message, ChannelError>,
) {
    if session.is_torn_down() {
        return;
    }
    match result {
        Ok(mut msg) => {
            msg.token = token;
            match msg.observe {
                Observe::Sequence(_) => {
                    let Some(seq) = session.next_seq(&token) else {
                        // No live subscription for the token anymore.
                        return;
                    };
                    msg.observe = Observe::Sequence(seq);
                    session.send(msg);
                }
                _ => {
                    session.relay_terminated(&token);
                    session.send(msg);
                }
            }
        }
        Err(err) => {
            let status = ResourceError::from_channel(sibling, err).status();
            session.relay_terminated(&token);
            session.send(Message::response(status, token));
        }
    }
}

#[async_trait]
impl Resource for ProxyResource {
    fn uri(&self) -> &[&str] {
        &self.uri
    }

    async fn handle(
        &self,
        session: &Arc<Session>,
        request: Message,
    ) -> Result<Respond, ResourceError> {
        if self.require_auth && !session.is_authenticated() {
            return Err(ResourceError::Unauthorized(format!(
                "sign-in required for {}",
                request.uri()
            )));
        }

        let channel = self
            .source
            .channel(&self.sibling)
            .ok_or_else(|| ResourceError::SiblingUnavailable(self.sibling.clone()))?;

        let token = request.token;
        let mut upstream = request.clone();
        // The sibling has no other way to learn the caller's identity.
        if let Some(identity) = session.identity() {
            upstream.append_query("uid", identity.user_id);
            upstream.append_query("di", identity.device_id);
        }

        let handler: ResponseHandler = {
            let session = Arc::clone(session);
            let sibling = self.sibling.clone();
            Arc::new(move |result| relay_response(&session, token, &sibling, result))
        };

        match request.observe {
            Observe::Subscribe => {
                session.subscribe(token, request.clone());
                session.record_relay(token, request.clone(), Arc::clone(&channel));
                if let Err(err) = channel.send_request(upstream, handler) {
                    session.unsubscribe(&token);
                    session.remove_relay(&token);
                    return Err(ResourceError::from_channel(&self.sibling, err));
                }
                Ok(Respond::Deferred)
            }
            Observe::Unsubscribe => {
                // Idempotent: an unknown token clears nothing and still acks.
                session.unsubscribe(&token);
                session.remove_relay(&token);
                match channel.send_request(upstream, handler) {
                    Ok(()) => Ok(Respond::Deferred),
                    // Local state is already clean; the sibling will reap its
                    // side when our link to it recovers or resets.
                    Err(_) => Ok(Respond::Now(Message::response_to(&request, Status::Content))),
                }
            }
            _ => {
                channel
                    .send_request(upstream, handler)
                    .map_err(|err| ResourceError::from_channel(&self.sibling, err))?;
                Ok(Respond::Deferred)
            }
        }
    }
}
