use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use trellis_codec::CoapFrameCodec;
use trellis_router::ResourceManager;
use trellis_session::{Session, SessionRegistry};

use crate::tls::{build_acceptor, TlsConfig, TlsError};

/// Outbound queue depth per connection.
const SESSION_QUEUE: usize = 256;

/// CoAP-over-TCP listener configuration. TLS, when present, wraps accepted
/// sockets before the decode stage.
pub struct CoapServerConfig {
    pub addr: String,
    pub tls: Option<TlsConfig>,
}

/// Handle returned by `start_coap` — keeps the accept loop alive.
pub struct CoapServerHandle {
    pub addr: SocketAddr,
    _accept: tokio::task::JoinHandle<()>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Bind the listener and start accepting device connections.
pub async fn start_coap(
    config: CoapServerConfig,
    manager: Arc<ResourceManager>,
    registry: Arc<SessionRegistry>,
) -> Result<CoapServerHandle, ServeError> {
    let acceptor = config.tls.as_ref().map(build_acceptor).transpose()?;
    let listener = TcpListener::bind(&config.addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, tls = acceptor.is_some(), "CoAP listener bound");

    let accept = tokio::spawn(accept_loop(listener, acceptor, manager, registry));
    Ok(CoapServerHandle {
        addr,
        _accept: accept,
    })
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    manager: Arc<ResourceManager>,
    registry: Arc<SessionRegistry>,
) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "Accept failed");
                continue;
            }
        };

        let manager = Arc::clone(&manager);
        let registry = Arc::clone(&registry);
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            match acceptor {
                Some(tls) => match tls.accept(socket).await {
                    Ok(stream) => serve_connection(stream, manager, registry).await,
                    Err(err) => {
                        tracing::warn!(%peer, error = %err, "TLS handshake failed");
                    }
                },
                None => serve_connection(socket, manager, registry).await,
            }
        });
    }
}

/// Run one connection to completion: a writer task draining the session's
/// queue and a reader task dispatching decoded frames in FIFO order. The
/// session is torn down (cascading unsubscribes upstream) as soon as either
/// side of the connection dies.
pub async fn serve_connection<S>(
    stream: S,
    manager: Arc<ResourceManager>,
    registry: Arc<SessionRegistry>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = Framed::new(stream, CoapFrameCodec::new()).split();
    let (tx, mut rx) = mpsc::channel(SESSION_QUEUE);
    let session = Arc::new(Session::new(tx));
    registry.insert(Arc::clone(&session));
    tracing::info!(session_id = %session.id(), "Connection accepted");

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let reader_session = Arc::clone(&session);
    let reader = tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(msg) => {
                    // Awaiting each dispatch keeps per-connection ordering FIFO.
                    if let Some(response) = manager.dispatch(&reader_session, msg).await {
                        reader_session.send(response);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %reader_session.id(),
                        error = %err,
                        "Frame decode failed"
                    );
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.remove(session.id());
    tracing::info!(session_id = %session.id(), "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use trellis_core::{Message, Method, Observe, ResourceError, Status};
    use trellis_router::{Resource, Respond};

    struct EchoResource;

    #[async_trait]
    impl Resource for EchoResource {
        fn uri(&self) -> &[&str] {
            &["echo"]
        }

        async fn handle(
            &self,
            session: &Arc<Session>,
            request: Message,
        ) -> Result<Respond, ResourceError> {
            if request.observe.is_subscribe() {
                session.subscribe(request.token, request.clone());
                let seq = session.next_seq(&request.token).unwrap();
                return Ok(Respond::Now(
                    Message::response_to(&request, Status::Content)
                        .with_observe(Observe::Sequence(seq)),
                ));
            }
            Ok(Respond::Now(
                Message::response_to(&request, Status::Content).with_payload(request.payload),
            ))
        }
    }

    fn setup() -> (Arc<ResourceManager>, Arc<SessionRegistry>) {
        let mut manager = ResourceManager::new();
        manager.register(Arc::new(EchoResource));
        (Arc::new(manager), Arc::new(SessionRegistry::new()))
    }

    async fn wait_until(mut probe: impl FnMut() -> bool) {
        for _ in 0..200 {
            if probe() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn request_response_over_a_connection() {
        let (manager, registry) = setup();
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(serve_connection(server, manager, Arc::clone(&registry)));

        let mut framed = Framed::new(client, CoapFrameCodec::new());
        let request = Message::request(Method::Get, ["echo"]).with_payload(&b"hi"[..]);
        framed.send(request.clone()).await.unwrap();

        let response = framed.next().await.unwrap().unwrap();
        assert_eq!(response.status(), Some(Status::Content));
        assert_eq!(response.token, request.token);
        assert_eq!(response.payload.as_ref(), b"hi");
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn unknown_path_gets_not_found() {
        let (manager, registry) = setup();
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(serve_connection(server, manager, registry));

        let mut framed = Framed::new(client, CoapFrameCodec::new());
        framed
            .send(Message::request(Method::Get, ["missing"]))
            .await
            .unwrap();
        let response = framed.next().await.unwrap().unwrap();
        assert_eq!(response.status(), Some(Status::NotFound));
    }

    #[tokio::test]
    async fn subscribe_ack_carries_sequence_one() {
        let (manager, registry) = setup();
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(serve_connection(server, manager, registry));

        let mut framed = Framed::new(client, CoapFrameCodec::new());
        framed
            .send(Message::request(Method::Get, ["echo"]).with_observe(Observe::Subscribe))
            .await
            .unwrap();
        let response = framed.next().await.unwrap().unwrap();
        assert_eq!(response.observe, Observe::Sequence(1));
    }

    #[tokio::test]
    async fn disconnect_removes_the_session() {
        let (manager, registry) = setup();
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(serve_connection(server, manager, Arc::clone(&registry)));

        let mut framed = Framed::new(client, CoapFrameCodec::new());
        framed
            .send(Message::request(Method::Get, ["echo"]))
            .await
            .unwrap();
        let _ = framed.next().await;
        assert_eq!(registry.count(), 1);

        drop(framed);
        wait_until(|| registry.count() == 0).await;
    }
}
