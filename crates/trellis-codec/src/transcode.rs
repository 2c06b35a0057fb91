//! JSON↔CBOR payload transcoding.
//!
//! Browser clients speak JSON over the WebSocket and HTTP bridges while the
//! internal payload format is CBOR; both directions convert through a
//! self-describing value tree.

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid CBOR payload: {0}")]
    Cbor(String),
}

/// Convert a JSON document to its CBOR encoding.
pub fn json_to_cbor(json: &[u8]) -> Result<Vec<u8>, TranscodeError> {
    let value: serde_json::Value = serde_json::from_slice(json)?;
    let mut out = Vec::new();
    ciborium::into_writer(&value, &mut out).map_err(|e| TranscodeError::Cbor(e.to_string()))?;
    Ok(out)
}

/// Convert a CBOR document to its JSON encoding. Fails on CBOR constructs
/// JSON cannot express (non-string map keys, raw byte strings).
pub fn cbor_to_json(cbor: &[u8]) -> Result<Vec<u8>, TranscodeError> {
    let value: ciborium::Value =
        ciborium::from_reader(cbor).map_err(|e| TranscodeError::Cbor(e.to_string()))?;
    Ok(serde_json::to_vec(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_cbor_json_roundtrip() {
        let json = br#"{"uid":"u1","login":true,"inarray":[1,2,4,8]}"#;
        let cbor = json_to_cbor(json).unwrap();
        assert_ne!(cbor.as_slice(), json.as_slice());

        let back = cbor_to_json(&cbor).unwrap();
        let original: serde_json::Value = serde_json::from_slice(json).unwrap();
        let roundtripped: serde_json::Value = serde_json::from_slice(&back).unwrap();
        assert_eq!(original, roundtripped);
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(
            json_to_cbor(b"{not json"),
            Err(TranscodeError::Json(_))
        ));
    }

    #[test]
    fn truncated_cbor_is_rejected() {
        let cbor = json_to_cbor(br#"{"a":1}"#).unwrap();
        assert!(matches!(
            cbor_to_json(&cbor[..cbor.len() - 1]),
            Err(TranscodeError::Cbor(_))
        ));
    }
}
