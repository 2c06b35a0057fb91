use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity bound to a session after a successful sign-in relay.
///
/// Absent fields stay absent on serialization (the wire omits nulls rather
/// than sending them).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "uid")]
    pub user_id: String,
    #[serde(rename = "di")]
    pub device_id: String,
    #[serde(rename = "accesstoken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Seconds until the access token expires, as granted by the account
    /// service.
    #[serde(rename = "expiresin", skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip)]
    pub issued_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            access_token: None,
            expires_in: None,
            issued_at: Some(Utc::now()),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>, expires_in: Option<i64>) -> Self {
        self.access_token = Some(token.into());
        self.expires_in = expires_in;
        self
    }

    /// Whether the granted token lifetime has elapsed. Identities without an
    /// expiry policy never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.issued_at, self.expires_in) {
            (Some(issued), Some(secs)) => now - issued > chrono::Duration::seconds(secs),
            _ => false,
        }
    }
}
