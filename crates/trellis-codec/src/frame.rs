use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use trellis_core::Message;

use crate::packet::{decode_message, encode_message, CodecError};

/// Default cap on a single frame; CoAP messages in this stack are small.
const DEFAULT_MAX_FRAME: usize = 256 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Stream framing for the TCP/TLS transports: a 4-byte big-endian length
/// prefix followed by one UDP-format CoAP packet.
///
/// WebSocket transports skip this codec entirely — WS frames already
/// delimit messages.
pub struct CoapFrameCodec {
    max_frame: usize,
}

impl CoapFrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for CoapFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CoapFrameCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let mut length_bytes = [0u8; LENGTH_PREFIX];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX]);
        let length = u32::from_be_bytes(length_bytes) as usize;
        if length > self.max_frame {
            return Err(CodecError::Oversized(length));
        }
        if src.len() < LENGTH_PREFIX + length {
            src.reserve(LENGTH_PREFIX + length - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX);
        let frame = src.split_to(length);
        decode_message(&frame).map(Some)
    }
}

impl Encoder<Message> for CoapFrameCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let raw = encode_message(&msg)?;
        if raw.len() > self.max_frame {
            return Err(CodecError::Oversized(raw.len()));
        }
        dst.reserve(LENGTH_PREFIX + raw.len());
        dst.put_u32(raw.len() as u32);
        dst.extend_from_slice(&raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{Method, Status};

    #[test]
    fn encode_then_decode_one_frame() {
        let mut codec = CoapFrameCodec::new();
        let msg = Message::request(Method::Get, ["oic", "res"]).with_payload(&b"hello"[..]);

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded.path, msg.path);
        assert_eq!(decoded.token, msg.token);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_yields_none_until_complete() {
        let mut codec = CoapFrameCodec::new();
        let msg = Message::request(Method::Post, ["oic", "ping"]);

        let mut full = BytesMut::new();
        codec.encode(msg.clone(), &mut full).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[3..full.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[full.len() - 1..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.token, msg.token);
    }

    #[test]
    fn two_frames_back_to_back() {
        let mut codec = CoapFrameCodec::new();
        let first = Message::request(Method::Get, ["a"]);
        let second = Message::response(Status::Content, first.token);

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        let one = codec.decode(&mut buf).unwrap().unwrap();
        let two = codec.decode(&mut buf).unwrap().unwrap();
        assert!(one.is_request());
        assert_eq!(two.status(), Some(Status::Content));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = CoapFrameCodec::with_max_frame(16);
        let mut buf = BytesMut::new();
        buf.put_u32(1024);
        buf.extend_from_slice(&[0u8; 32]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Oversized(1024))
        ));
    }
}
