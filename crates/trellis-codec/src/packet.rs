use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use trellis_core::{Code, Message, Method, Observe, Status, Token};

/// Observe option values on requests (RFC 7641 register/deregister).
const OBSERVE_REGISTER: u32 = 0;
const OBSERVE_DEREGISTER: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("unsupported message code {0}")]
    UnsupportedCode(String),
    #[error("token longer than 8 bytes")]
    TokenTooLong,
    #[error("frame of {0} bytes exceeds the limit")]
    Oversized(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Encode a structured message into raw CoAP packet bytes (UDP format, no
/// framing).
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let mut packet = Packet::new();
    packet.header.set_version(1);
    packet.header.set_type(MessageType::NonConfirmable);
    packet.header.code = match msg.code {
        Code::Request(m) => MessageClass::Request(encode_method(m)),
        Code::Response(s) => MessageClass::Response(encode_status(s)),
    };
    packet.set_token(msg.token.as_slice().to_vec());

    for segment in &msg.path {
        packet.add_option(CoapOption::UriPath, segment.clone().into_bytes());
    }
    // Key order is irrelevant on the wire; per-key value order is kept.
    for (key, values) in &msg.query {
        for value in values {
            packet.add_option(CoapOption::UriQuery, format!("{key}={value}").into_bytes());
        }
    }
    if let Some(format) = msg.content_format {
        packet.add_option(CoapOption::ContentFormat, encode_uint(u32::from(format)));
    }
    match msg.observe {
        Observe::Nothing => {}
        Observe::Subscribe => {
            packet.add_option(CoapOption::Observe, encode_uint(OBSERVE_REGISTER));
        }
        Observe::Unsubscribe => {
            packet.add_option(CoapOption::Observe, encode_uint(OBSERVE_DEREGISTER));
        }
        Observe::Sequence(n) => {
            packet.add_option(CoapOption::Observe, encode_uint(n));
        }
    }
    packet.payload = msg.payload.to_vec();

    packet
        .to_bytes()
        .map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode raw CoAP packet bytes (UDP format, no framing) into a structured
/// message.
pub fn decode_message(raw: &[u8]) -> Result<Message, CodecError> {
    let packet = Packet::from_bytes(raw).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let code = match packet.header.code {
        MessageClass::Request(m) => Code::Request(decode_method(m)?),
        MessageClass::Response(s) => Code::Response(decode_status(s)?),
        other => return Err(CodecError::UnsupportedCode(format!("{other:?}"))),
    };

    let token = Token::from_slice(packet.get_token()).ok_or(CodecError::TokenTooLong)?;

    let mut path = Vec::new();
    if let Some(segments) = packet.get_option(CoapOption::UriPath) {
        for raw_segment in segments {
            path.push(String::from_utf8_lossy(raw_segment).into_owned());
        }
    }

    let mut msg = match code {
        Code::Request(method) => Message::request(method, path).with_token(token),
        Code::Response(status) => {
            let mut response = Message::response(status, token);
            response.path = path;
            response
        }
    };

    if let Some(entries) = packet.get_option(CoapOption::UriQuery) {
        for raw_entry in entries {
            let entry = String::from_utf8_lossy(raw_entry);
            match entry.split_once('=') {
                Some((key, value)) => msg.append_query(key, value),
                None => msg.append_query(entry.into_owned(), ""),
            }
        }
    }

    if let Some(values) = packet.get_option(CoapOption::ContentFormat) {
        if let Some(raw_format) = values.front() {
            msg.content_format = Some(decode_uint(raw_format) as u16);
        }
    }

    msg.observe = match packet.get_option(CoapOption::Observe).and_then(|v| v.front()) {
        None => Observe::Nothing,
        Some(raw_value) => {
            let value = decode_uint(raw_value);
            match msg.code {
                Code::Request(_) if value == OBSERVE_REGISTER => Observe::Subscribe,
                Code::Request(_) => Observe::Unsubscribe,
                Code::Response(_) => Observe::Sequence(value),
            }
        }
    };

    if !packet.payload.is_empty() {
        msg.payload = bytes::Bytes::from(packet.payload.clone());
    }

    Ok(msg)
}

fn encode_method(method: Method) -> RequestType {
    match method {
        Method::Get => RequestType::Get,
        Method::Post => RequestType::Post,
        Method::Put => RequestType::Put,
        Method::Delete => RequestType::Delete,
    }
}

fn decode_method(method: RequestType) -> Result<Method, CodecError> {
    match method {
        RequestType::Get => Ok(Method::Get),
        RequestType::Post => Ok(Method::Post),
        RequestType::Put => Ok(Method::Put),
        RequestType::Delete => Ok(Method::Delete),
        other => Err(CodecError::UnsupportedCode(format!("{other:?}"))),
    }
}

fn encode_status(status: Status) -> ResponseType {
    match status {
        Status::Created => ResponseType::Created,
        Status::Deleted => ResponseType::Deleted,
        Status::Valid => ResponseType::Valid,
        Status::Changed => ResponseType::Changed,
        Status::Content => ResponseType::Content,
        Status::BadRequest => ResponseType::BadRequest,
        Status::Unauthorized => ResponseType::Unauthorized,
        Status::BadOption => ResponseType::BadOption,
        Status::Forbidden => ResponseType::Forbidden,
        Status::NotFound => ResponseType::NotFound,
        Status::MethodNotAllowed => ResponseType::MethodNotAllowed,
        Status::PreconditionFailed => ResponseType::PreconditionFailed,
        Status::InternalServerError => ResponseType::InternalServerError,
        Status::NotImplemented => ResponseType::NotImplemented,
        Status::ServiceUnavailable => ResponseType::ServiceUnavailable,
        Status::GatewayTimeout => ResponseType::GatewayTimeout,
    }
}

fn decode_status(status: ResponseType) -> Result<Status, CodecError> {
    match status {
        ResponseType::Created => Ok(Status::Created),
        ResponseType::Deleted => Ok(Status::Deleted),
        ResponseType::Valid => Ok(Status::Valid),
        ResponseType::Changed => Ok(Status::Changed),
        ResponseType::Content => Ok(Status::Content),
        ResponseType::BadRequest => Ok(Status::BadRequest),
        ResponseType::Unauthorized => Ok(Status::Unauthorized),
        ResponseType::BadOption => Ok(Status::BadOption),
        ResponseType::Forbidden => Ok(Status::Forbidden),
        ResponseType::NotFound => Ok(Status::NotFound),
        ResponseType::MethodNotAllowed => Ok(Status::MethodNotAllowed),
        ResponseType::PreconditionFailed => Ok(Status::PreconditionFailed),
        ResponseType::InternalServerError => Ok(Status::InternalServerError),
        ResponseType::NotImplemented => Ok(Status::NotImplemented),
        ResponseType::ServiceUnavailable => Ok(Status::ServiceUnavailable),
        ResponseType::GatewayTimeout => Ok(Status::GatewayTimeout),
        other => Err(CodecError::UnsupportedCode(format!("{other:?}"))),
    }
}

/// CoAP uint option encoding: big-endian with leading zeros stripped.
fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn decode_uint(raw: &[u8]) -> u32 {
    raw.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}
