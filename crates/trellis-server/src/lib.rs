//! Transport adapters and built-in resources for the routing stack.
//!
//! Each transport binds its own listening socket: raw CoAP-over-TCP (with
//! optional TLS), an HTTP-to-CoAP bridge, and a WebSocket bridge carrying
//! raw CoAP frames. All of them feed decoded messages into the shared
//! `ResourceManager` and produce `Session` instances in the shared registry.

pub mod http_bridge;
pub mod resources;
pub mod tcp;
pub mod tls;
pub mod ws_bridge;

pub use http_bridge::start_http_bridge;
pub use tcp::{start_coap, CoapServerConfig};
pub use tls::TlsConfig;
pub use ws_bridge::start_ws_bridge;
