use std::collections::BTreeMap;

use bytes::Bytes;

use crate::status::Status;
use crate::token::Token;

/// Well-known Content-Format option values.
pub mod content_format {
    /// application/json
    pub const JSON: u16 = 50;
    /// application/cbor
    pub const CBOR: u16 = 60;
}

/// CoAP request methods supported by the routing layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// A message is either a request carrying a method or a response carrying a
/// status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    Request(Method),
    Response(Status),
}

/// Observation marker riding on the same message structure as ordinary
/// requests and responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observe {
    /// Plain request/response; no subscription state involved.
    Nothing,
    /// Request: establish a subscription under the message token.
    Subscribe,
    /// Request: tear the subscription down.
    Unsubscribe,
    /// Response/notification: the per-token sequence number.
    Sequence(u32),
}

impl Observe {
    pub fn is_subscribe(&self) -> bool {
        matches!(self, Self::Subscribe)
    }

    pub fn is_unsubscribe(&self) -> bool {
        matches!(self, Self::Unsubscribe)
    }
}

/// Structured request/response representation, abstracted from wire bytes.
///
/// Construction goes through the builder-style `with_*` methods; nothing
/// mutates a message after it has been handed to the dispatch layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub code: Code,
    /// Ordered URI path segments.
    pub path: Vec<String>,
    /// Multi-valued query parameters. Key order is irrelevant; per-key value
    /// order is preserved.
    pub query: BTreeMap<String, Vec<String>>,
    /// Opaque payload bytes; the codec boundary decides the representation.
    pub payload: Bytes,
    pub token: Token,
    pub observe: Observe,
    /// CoAP Content-Format option, when present.
    pub content_format: Option<u16>,
}

impl Message {
    pub fn request<S: Into<String>>(method: Method, path: impl IntoIterator<Item = S>) -> Self {
        Self {
            code: Code::Request(method),
            path: path.into_iter().map(Into::into).collect(),
            query: BTreeMap::new(),
            payload: Bytes::new(),
            token: Token::generate(),
            observe: Observe::Nothing,
            content_format: None,
        }
    }

    pub fn response(status: Status, token: Token) -> Self {
        Self {
            code: Code::Response(status),
            path: Vec::new(),
            query: BTreeMap::new(),
            payload: Bytes::new(),
            token,
            observe: Observe::Nothing,
            content_format: None,
        }
    }

    /// Build a response correlated to `request` via its token.
    pub fn response_to(request: &Message, status: Status) -> Self {
        Self::response(status, request.token)
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_observe(mut self, observe: Observe) -> Self {
        self.observe = observe;
        self
    }

    pub fn with_content_format(mut self, format: u16) -> Self {
        self.content_format = Some(format);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.append_query(key, value);
        self
    }

    /// Append a query value, preserving the order of values under the key.
    pub fn append_query(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.entry(key.into()).or_default().push(value.into());
    }

    /// First value registered under `key`, if any.
    pub fn query_first(&self, key: &str) -> Option<&str> {
        self.query.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn is_request(&self) -> bool {
        matches!(self.code, Code::Request(_))
    }

    pub fn method(&self) -> Option<Method> {
        match self.code {
            Code::Request(m) => Some(m),
            Code::Response(_) => None,
        }
    }

    pub fn status(&self) -> Option<Status> {
        match self.code {
            Code::Request(_) => None,
            Code::Response(s) => Some(s),
        }
    }

    /// The path rendered as "/a/b/c" for logging and bridge mapping.
    pub fn uri(&self) -> String {
        if self.path.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", self.path.join("/"))
        }
    }
}
