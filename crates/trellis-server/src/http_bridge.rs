use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use trellis_codec::{cbor_to_json, json_to_cbor};
use trellis_core::{content_format, Message, Method};
use trellis_router::ResourceManager;
use trellis_session::Session;

/// How long a bridged request may wait on a deferred (proxied) response.
const DEFERRED_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_BODY: usize = 1024 * 1024;

#[derive(Clone)]
struct BridgeState {
    manager: Arc<ResourceManager>,
}

/// Handle returned by `start_http_bridge` — keeps the server alive.
pub struct HttpBridgeHandle {
    pub addr: SocketAddr,
    _server: tokio::task::JoinHandle<()>,
}

/// HTTP-to-CoAP bridge: every verb/path/query maps to a synthesized CoAP
/// request with a fresh token; JSON bodies are transcoded to CBOR inbound
/// and back outbound. Observe has no meaning over plain HTTP — bridged
/// sessions are ephemeral, one per request.
pub async fn start_http_bridge(
    addr: &str,
    manager: Arc<ResourceManager>,
) -> std::io::Result<HttpBridgeHandle> {
    let router = Router::new()
        .fallback(bridge)
        .with_state(BridgeState { manager })
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "HTTP bridge bound");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    Ok(HttpBridgeHandle {
        addr: local_addr,
        _server: server,
    })
}

async fn bridge(State(state): State<BridgeState>, request: Request) -> Response {
    let method = match request.method().as_str() {
        "GET" => Method::Get,
        "POST" => Method::Post,
        "PUT" => Method::Put,
        "DELETE" => Method::Delete,
        other => {
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                format!("unsupported method {other}"),
            )
                .into_response()
        }
    };

    let uri = request.uri().clone();
    let path: Vec<String> = uri
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY).await {
        Ok(bytes) => bytes,
        Err(err) => return (StatusCode::BAD_REQUEST, format!("unreadable body: {err}")).into_response(),
    };

    let mut msg = Message::request(method, path);
    if let Some(raw_query) = uri.query() {
        for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => msg.append_query(key, value),
                None => msg.append_query(pair, ""),
            }
        }
    }
    if !body.is_empty() {
        let cbor = match json_to_cbor(&body) {
            Ok(cbor) => cbor,
            Err(err) => {
                return (StatusCode::BAD_REQUEST, format!("invalid json body: {err}"))
                    .into_response()
            }
        };
        msg = msg
            .with_payload(cbor)
            .with_content_format(content_format::CBOR);
    }

    // Ephemeral session: catches a deferred handler's pushed response.
    let (tx, mut rx) = mpsc::channel(8);
    let session = Arc::new(Session::new(tx));

    let response = match state.manager.dispatch(&session, msg).await {
        Some(response) => response,
        None => match tokio::time::timeout(DEFERRED_TIMEOUT, rx.recv()).await {
            Ok(Some(response)) => response,
            _ => {
                session.teardown();
                return StatusCode::GATEWAY_TIMEOUT.into_response();
            }
        },
    };
    session.teardown();

    render(&response)
}

fn render(msg: &Message) -> Response {
    let status = msg
        .status()
        .map(|s| s.http_code())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if msg.payload.is_empty() {
        return status.into_response();
    }
    match cbor_to_json(&msg.payload) {
        Ok(json) => (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            json,
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "Response payload is not CBOR, passing through");
            (
                status,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                msg.payload.to_vec(),
            )
                .into_response()
        }
    }
}
