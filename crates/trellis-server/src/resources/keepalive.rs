use std::sync::Arc;

use async_trait::async_trait;
use trellis_core::{content_format, Message, Method, ResourceError, Status};
use trellis_router::{Resource, Respond};
use trellis_session::Session;

use super::{decode_cbor, encode_cbor};

/// Intervals (in minutes) a device may ping at.
const SUPPORTED_INTERVALS: [u64; 4] = [1, 2, 4, 8];

/// The `/oic/ping` keepalive resource.
///
/// GET advertises the supported interval set; POST or PUT with `{"in": n}`
/// selects one and refreshes the session's liveness deadline. Sessions that
/// stop pinging are reaped by the registry sweeper.
pub struct KeepAliveResource;

#[async_trait]
impl Resource for KeepAliveResource {
    fn uri(&self) -> &[&str] {
        &["oic", "ping"]
    }

    async fn handle(
        &self,
        session: &Arc<Session>,
        request: Message,
    ) -> Result<Respond, ResourceError> {
        match request.method() {
            Some(Method::Get) => {
                let payload = encode_cbor(&serde_json::json!({
                    "inarray": SUPPORTED_INTERVALS,
                }))?;
                Ok(Respond::Now(
                    Message::response_to(&request, Status::Content)
                        .with_payload(payload)
                        .with_content_format(content_format::CBOR),
                ))
            }
            Some(Method::Post) | Some(Method::Put) => {
                let payload = decode_cbor(&request.payload)?;
                let interval = payload
                    .get("in")
                    .and_then(serde_json::Value::as_u64)
                    .ok_or_else(|| {
                        ResourceError::BadRequest("missing required field: in".into())
                    })?;
                if interval == 0 {
                    return Err(ResourceError::PreconditionFailed(
                        "ping interval must be positive".into(),
                    ));
                }
                session.refresh_keepalive(interval);
                tracing::debug!(session_id = %session.id(), interval, "Keepalive refreshed");
                Ok(Respond::Now(Message::response_to(&request, Status::Valid)))
            }
            _ => Err(ResourceError::MethodNotAllowed(
                request.method().map(|m| m.as_str()).unwrap_or("?").into(),
            )),
        }
    }
}
