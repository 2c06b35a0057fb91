//! Core types shared across the trellis routing stack: the message model,
//! tokens, observe markers, status codes, the error taxonomy, and the
//! request-channel seam that sessions and the connector pool both implement.

pub mod channel;
pub mod error;
pub mod identity;
pub mod ids;
pub mod message;
pub mod status;
pub mod token;

pub use channel::{ChannelError, ChannelSource, RequestChannel, ResponseHandler};
pub use error::ResourceError;
pub use identity::Identity;
pub use ids::SessionId;
pub use message::{content_format, Code, Message, Method, Observe};
pub use status::Status;
pub use token::Token;
