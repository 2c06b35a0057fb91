//! Wire boundary for the routing stack: CoAP packet encode/decode on top of
//! `coap-lite`, length-prefixed stream framing for the TCP/TLS transports,
//! and JSON↔CBOR payload transcoding for the browser-facing edges.

pub mod frame;
pub mod packet;
pub mod transcode;

pub use frame::CoapFrameCodec;
pub use packet::{decode_message, encode_message, CodecError};
pub use transcode::{cbor_to_json, json_to_cbor, TranscodeError};
