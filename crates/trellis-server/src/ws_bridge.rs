use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use trellis_codec::{cbor_to_json, decode_message, encode_message, json_to_cbor, CodecError,
    TranscodeError};
use trellis_core::{content_format, Message};
use trellis_router::ResourceManager;
use trellis_session::{Session, SessionRegistry};

const SESSION_QUEUE: usize = 256;

#[derive(Clone)]
struct WsState {
    manager: Arc<ResourceManager>,
    registry: Arc<SessionRegistry>,
}

/// Handle returned by `start_ws_bridge` — keeps the server alive.
pub struct WsBridgeHandle {
    pub addr: SocketAddr,
    _server: tokio::task::JoinHandle<()>,
}

#[derive(Debug, thiserror::Error)]
enum EdgeError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

/// WebSocket bridge: binary frames carry raw CoAP-encoded bytes (the WS
/// frame already delimits, so no length prefix). Each socket gets a full
/// session, so browser clients can hold observations; JSON payloads are
/// transcoded to the internal CBOR on the way in and back on the way out.
pub async fn start_ws_bridge(
    addr: &str,
    manager: Arc<ResourceManager>,
    registry: Arc<SessionRegistry>,
) -> std::io::Result<WsBridgeHandle> {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(WsState { manager, registry });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "WebSocket bridge bound");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    Ok(WsBridgeHandle {
        addr: local_addr,
        _server: server,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (tx, mut rx) = mpsc::channel(SESSION_QUEUE);
    let session = Arc::new(Session::new(tx));
    state.registry.insert(Arc::clone(&session));
    tracing::info!(session_id = %session.id(), "WebSocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = session.id().clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match outbound_frame(msg) {
                Ok(frame) => {
                    if ws_tx.send(WsMessage::Binary(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(session_id = %writer_id, error = %err, "Encode failed");
                }
            }
        }
    });

    let reader_session = Arc::clone(&session);
    let manager = Arc::clone(&state.manager);
    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            match frame {
                WsMessage::Binary(data) => match inbound_message(&data) {
                    Ok(msg) => {
                        if let Some(response) = manager.dispatch(&reader_session, msg).await {
                            reader_session.send(response);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            session_id = %reader_session.id(),
                            error = %err,
                            "Dropping undecodable frame"
                        );
                    }
                },
                WsMessage::Close(_) => break,
                // Text frames are not part of the protocol; pings are
                // answered by axum itself.
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    state.registry.remove(session.id());
    tracing::info!(session_id = %session.id(), "WebSocket client disconnected");
}

/// Decode a binary WS frame and normalize a JSON payload to internal CBOR.
fn inbound_message(raw: &[u8]) -> Result<Message, EdgeError> {
    let mut msg = decode_message(raw)?;
    if msg.content_format == Some(content_format::JSON) && !msg.payload.is_empty() {
        msg.payload = json_to_cbor(&msg.payload)?.into();
        msg.content_format = Some(content_format::CBOR);
    }
    Ok(msg)
}

/// Present an internal CBOR payload as JSON and encode the frame.
fn outbound_frame(mut msg: Message) -> Result<Vec<u8>, EdgeError> {
    if msg.content_format == Some(content_format::CBOR) && !msg.payload.is_empty() {
        msg.payload = cbor_to_json(&msg.payload)?.into();
        msg.content_format = Some(content_format::JSON);
    }
    Ok(encode_message(&msg)?)
}
