/// CoAP response status codes used by the routing stack.
///
/// Only the codes the dispatch and proxy layers actually emit are modeled;
/// the wire codec maps them to and from the class.detail byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    // Success 2.xx
    Created,
    Deleted,
    Valid,
    Changed,
    Content,
    // Client error 4.xx
    BadRequest,
    Unauthorized,
    BadOption,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    PreconditionFailed,
    // Server error 5.xx
    InternalServerError,
    NotImplemented,
    ServiceUnavailable,
    GatewayTimeout,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Deleted | Self::Valid | Self::Changed | Self::Content
        )
    }

    /// The class.detail notation, e.g. "2.05" for Content.
    pub fn dotted(&self) -> &'static str {
        match self {
            Self::Created => "2.01",
            Self::Deleted => "2.02",
            Self::Valid => "2.03",
            Self::Changed => "2.04",
            Self::Content => "2.05",
            Self::BadRequest => "4.00",
            Self::Unauthorized => "4.01",
            Self::BadOption => "4.02",
            Self::Forbidden => "4.03",
            Self::NotFound => "4.04",
            Self::MethodNotAllowed => "4.05",
            Self::PreconditionFailed => "4.12",
            Self::InternalServerError => "5.00",
            Self::NotImplemented => "5.01",
            Self::ServiceUnavailable => "5.03",
            Self::GatewayTimeout => "5.04",
        }
    }

    /// Closest HTTP status equivalent, used by the HTTP bridge.
    pub fn http_code(&self) -> u16 {
        match self {
            Self::Created => 201,
            Self::Deleted | Self::Valid | Self::Changed => 204,
            Self::Content => 200,
            Self::BadRequest | Self::BadOption => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::PreconditionFailed => 412,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
            Self::ServiceUnavailable => 503,
            Self::GatewayTimeout => 504,
        }
    }
}
