use crate::channel::ChannelError;
use crate::status::Status;

/// Tagged error carried out of resource handlers.
///
/// Every variant maps to exactly one wire-level response status; the dispatch
/// layer performs the translation so handlers never build error responses
/// themselves.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ResourceError {
    /// Malformed or missing required payload or query field.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// A required field is present but null or empty.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// Invalid or expired access token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Valid caller, disallowed operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Unknown path, subscription token, or sibling topic.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("method {0} not allowed here")]
    MethodNotAllowed(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// The named sibling connection is down (mid-reconnect).
    #[error("sibling {0} unavailable")]
    SiblingUnavailable(String),
    /// The sibling never answered within the pending-entry deadline.
    #[error("sibling {0} timed out")]
    SiblingTimeout(String),
    /// Unexpected failure, including external-collaborator failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ResourceError {
    /// The single wire status this error renders to.
    pub fn status(&self) -> Status {
        match self {
            Self::BadRequest(_) => Status::BadRequest,
            Self::PreconditionFailed(_) => Status::PreconditionFailed,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::Forbidden(_) => Status::Forbidden,
            Self::NotFound(_) => Status::NotFound,
            Self::MethodNotAllowed(_) => Status::MethodNotAllowed,
            Self::NotImplemented(_) => Status::NotImplemented,
            Self::SiblingUnavailable(_) => Status::ServiceUnavailable,
            Self::SiblingTimeout(_) => Status::GatewayTimeout,
            Self::Internal(_) => Status::InternalServerError,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::NotImplemented(_) => "not_implemented",
            Self::SiblingUnavailable(_) => "sibling_unavailable",
            Self::SiblingTimeout(_) => "sibling_timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Translate a channel failure while relaying to the sibling `name`.
    pub fn from_channel(name: &str, err: ChannelError) -> Self {
        match err {
            ChannelError::Unavailable(_) | ChannelError::Closed => {
                Self::SiblingUnavailable(name.to_string())
            }
            ChannelError::Timeout(_) => Self::SiblingTimeout(name.to_string()),
        }
    }
}
