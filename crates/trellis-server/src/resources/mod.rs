//! Resources the routing layer itself owns. Everything else (account CRUD,
//! ACL storage, topic backends) lives in sibling services and is reached
//! through the proxy.

pub mod account;
pub mod keepalive;
pub mod proxy;

pub use account::AccountSessionResource;
pub use keepalive::KeepAliveResource;
pub use proxy::ProxyResource;

use bytes::Bytes;
use trellis_core::ResourceError;

/// Encode a value tree as a CBOR payload.
pub(crate) fn encode_cbor(value: &serde_json::Value) -> Result<Bytes, ResourceError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| ResourceError::Internal(format!("cbor encode: {e}")))?;
    Ok(Bytes::from(buf))
}

/// Decode a required CBOR payload into a value tree.
pub(crate) fn decode_cbor(payload: &[u8]) -> Result<serde_json::Value, ResourceError> {
    if payload.is_empty() {
        return Err(ResourceError::BadRequest("missing payload".into()));
    }
    ciborium::from_reader(payload)
        .map_err(|e| ResourceError::BadRequest(format!("invalid cbor payload: {e}")))
}

/// Best-effort CBOR decode for response payloads we only mine for fields.
pub(crate) fn decode_cbor_opt(payload: &[u8]) -> Option<serde_json::Value> {
    if payload.is_empty() {
        return None;
    }
    ciborium::from_reader(payload).ok()
}

/// Required string field: absent → bad-request, present but empty →
/// precondition-failed.
pub(crate) fn require_str<'a>(
    payload: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ResourceError> {
    match payload.get(key) {
        None => Err(ResourceError::BadRequest(format!(
            "missing required field: {key}"
        ))),
        Some(value) => match value.as_str() {
            Some(s) if !s.is_empty() => Ok(s),
            Some(_) => Err(ResourceError::PreconditionFailed(format!(
                "field {key} is empty"
            ))),
            None => Err(ResourceError::BadRequest(format!(
                "field {key} must be a string"
            ))),
        },
    }
}
