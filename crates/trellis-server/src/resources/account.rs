use std::sync::Arc;

use async_trait::async_trait;
use trellis_core::{ChannelSource, Identity, Message, Method, ResourceError, ResponseHandler};
use trellis_router::{Resource, Respond};
use trellis_session::Session;

use super::{decode_cbor, decode_cbor_opt, require_str};

/// Relay for `/oic/account/session` sign-in and sign-out.
///
/// The account service owns the credentials; this resource only forwards the
/// request and, on a successful sign-in response, binds the caller's
/// identity to the session (sign-out clears it). Everything the proxy layer
/// needs later — identity query propagation, authorization gates — hangs off
/// that binding.
pub struct AccountSessionResource {
    sibling: String,
    source: Arc<dyn ChannelSource>,
}

impl AccountSessionResource {
    pub fn new(sibling: &str, source: Arc<dyn ChannelSource>) -> Self {
        Self {
            sibling: sibling.to_string(),
            source,
        }
    }
}

#[async_trait]
impl Resource for AccountSessionResource {
    fn uri(&self) -> &[&str] {
        &["oic", "account", "session"]
    }

    async fn handle(
        &self,
        session: &Arc<Session>,
        request: Message,
    ) -> Result<Respond, ResourceError> {
        if request.method() != Some(Method::Post) {
            return Err(ResourceError::MethodNotAllowed(
                request.method().map(|m| m.as_str()).unwrap_or("?").into(),
            ));
        }

        let payload = decode_cbor(&request.payload)?;
        let login = payload
            .get("login")
            .and_then(serde_json::Value::as_bool)
            .ok_or_else(|| ResourceError::BadRequest("missing required field: login".into()))?;
        let user_id = require_str(&payload, "uid")?.to_string();
        let device_id = require_str(&payload, "di")?.to_string();
        let access_token = require_str(&payload, "accesstoken")?.to_string();

        let channel = self
            .source
            .channel(&self.sibling)
            .ok_or_else(|| ResourceError::SiblingUnavailable(self.sibling.clone()))?;

        let token = request.token;
        let handler: ResponseHandler = {
            let session = Arc::clone(session);
            let sibling = self.sibling.clone();
            Arc::new(move |result| match result {
                Ok(mut response) => {
                    if response.status().is_some_and(|s| s.is_success()) {
                        if login {
                            let expires_in = decode_cbor_opt(&response.payload)
                                .and_then(|p| p.get("expiresin").and_then(|v| v.as_i64()));
                            session.authenticate(
                                Identity::new(user_id.clone(), device_id.clone())
                                    .with_access_token(access_token.clone(), expires_in),
                            );
                        } else {
                            session.deauthenticate();
                        }
                    }
                    response.token = token;
                    session.send(response);
                }
                Err(err) => {
                    let status = ResourceError::from_channel(&sibling, err).status();
                    session.send(Message::response(status, token));
                }
            })
        };

        channel
            .send_request(request, handler)
            .map_err(|err| ResourceError::from_channel(&self.sibling, err))?;
        Ok(Respond::Deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing::{FakeChannel, FakeSource};
    use tokio::sync::mpsc;
    use trellis_core::{content_format, Status};

    fn resource(channel: &Arc<FakeChannel>) -> AccountSessionResource {
        AccountSessionResource::new("account", FakeSource::with("account", Arc::clone(channel)))
    }

    fn session() -> (Arc<Session>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(Session::new(tx)), rx)
    }

    fn sign_in_request(login: bool) -> Message {
        let payload = super::super::encode_cbor(&serde_json::json!({
            "login": login,
            "uid": "u1",
            "di": "d1",
            "accesstoken": "tok-123",
        }))
        .unwrap();
        Message::request(Method::Post, ["oic", "account", "session"])
            .with_payload(payload)
            .with_content_format(content_format::CBOR)
    }

    #[tokio::test]
    async fn successful_sign_in_binds_identity() {
        let channel = FakeChannel::new("account");
        let resource = resource(&channel);
        let (session, mut rx) = session();

        let request = sign_in_request(true);
        let token = request.token;
        let outcome = resource.handle(&session, request).await.unwrap();
        assert!(matches!(outcome, Respond::Deferred));
        assert!(!session.is_authenticated());

        let grant = super::super::encode_cbor(&serde_json::json!({"expiresin": 3600})).unwrap();
        channel.deliver(Message::response(Status::Changed, token).with_payload(grant));

        let relayed = rx.recv().await.unwrap();
        assert_eq!(relayed.status(), Some(Status::Changed));
        assert!(session.is_authenticated());
        let identity = session.identity().unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.device_id, "d1");
        assert_eq!(identity.access_token.as_deref(), Some("tok-123"));
        assert_eq!(identity.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn rejected_sign_in_leaves_session_anonymous() {
        let channel = FakeChannel::new("account");
        let resource = resource(&channel);
        let (session, mut rx) = session();

        let request = sign_in_request(true);
        let token = request.token;
        resource.handle(&session, request).await.unwrap();

        channel.deliver(Message::response(Status::Unauthorized, token));
        let relayed = rx.recv().await.unwrap();
        assert_eq!(relayed.status(), Some(Status::Unauthorized));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn sign_out_clears_identity() {
        let channel = FakeChannel::new("account");
        let resource = resource(&channel);
        let (session, mut rx) = session();
        session.authenticate(Identity::new("u1", "d1").with_access_token("tok", None));

        let request = sign_in_request(false);
        let token = request.token;
        resource.handle(&session, request).await.unwrap();

        channel.deliver(Message::response(Status::Changed, token));
        let _ = rx.recv().await.unwrap();
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn missing_login_field_is_bad_request() {
        let channel = FakeChannel::new("account");
        let resource = resource(&channel);
        let (session, _rx) = session();

        let payload = super::super::encode_cbor(&serde_json::json!({
            "uid": "u1", "di": "d1", "accesstoken": "tok",
        }))
        .unwrap();
        let request =
            Message::request(Method::Post, ["oic", "account", "session"]).with_payload(payload);
        let err = resource.handle(&session, request).await.unwrap_err();
        assert_eq!(err.status(), Status::BadRequest);
    }

    #[tokio::test]
    async fn empty_uid_is_precondition_failed() {
        let channel = FakeChannel::new("account");
        let resource = resource(&channel);
        let (session, _rx) = session();

        let payload = super::super::encode_cbor(&serde_json::json!({
            "login": true, "uid": "", "di": "d1", "accesstoken": "tok",
        }))
        .unwrap();
        let request =
            Message::request(Method::Post, ["oic", "account", "session"]).with_payload(payload);
        let err = resource.handle(&session, request).await.unwrap_err();
        assert_eq!(err.status(), Status::PreconditionFailed);
    }

    #[tokio::test]
    async fn get_is_not_allowed() {
        let channel = FakeChannel::new("account");
        let resource = resource(&channel);
        let (session, _rx) = session();

        let err = resource
            .handle(
                &session,
                Message::request(Method::Get, ["oic", "account", "session"]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::MethodNotAllowed);
    }

    #[tokio::test]
    async fn account_sibling_down_is_service_unavailable() {
        let resource = AccountSessionResource::new("account", FakeSource::empty());
        let (session, _rx) = session();

        let err = resource
            .handle(&session, sign_in_request(true))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::ServiceUnavailable);
    }
}
