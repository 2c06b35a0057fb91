use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use trellis_codec::CoapFrameCodec;
use trellis_core::RequestChannel;

use crate::connection::{Connection, SEND_QUEUE};

/// Reconnect timing. The asymmetry is deliberate: a dropped live link
/// redials near-immediately to minimize service disruption, while a sibling
/// that was never reachable is retried on a long period.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Delay after a failed dial attempt.
    pub initial_retry: Duration,
    /// Delay before redialing after a live link dropped.
    pub reconnect_delay: Duration,
    /// How often the pending-entry sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_retry: Duration::from_secs(5),
            reconnect_delay: Duration::from_millis(5),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Registry of persistent named outbound connections to sibling services
/// ("account", "rd", "mq"). Connections are created from configuration at
/// startup and re-established forever on loss; any handler can look one up
/// by name. The pool is passed to resources at construction — there is no
/// process-wide instance.
pub struct ConnectorPool {
    connections: DashMap<String, Arc<Connection>>,
    policy: RetryPolicy,
}

impl ConnectorPool {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            connections: DashMap::new(),
            policy,
        }
    }

    /// Register `name` and start dialing `addr`, forever. Returns the
    /// connection handle immediately; it becomes established in the
    /// background without caller intervention.
    pub fn request_connection(&self, name: &str, addr: impl Into<String>) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(name));
        self.connections
            .insert(name.to_string(), Arc::clone(&conn));
        tokio::spawn(maintain(Arc::clone(&conn), addr.into(), self.policy.clone()));
        conn
    }

    /// The connection registered under `name`, or none if it has never been
    /// established. A connection that established once stays visible while
    /// mid-reconnect; sends during the outage fail fast.
    pub fn get(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections
            .get(name)
            .filter(|c| c.is_established())
            .map(|c| Arc::clone(&c))
    }

    pub fn names(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for ConnectorPool {
    fn default() -> Self {
        Self::new()
    }
}

impl trellis_core::ChannelSource for ConnectorPool {
    fn channel(&self, name: &str) -> Option<Arc<dyn RequestChannel>> {
        self.get(name).map(|c| c as Arc<dyn RequestChannel>)
    }
}

/// Dial-forever loop for one named connection. No retry ceiling: sibling
/// services are co-located infrastructure expected to eventually recover.
async fn maintain(conn: Arc<Connection>, addr: String, policy: RetryPolicy) {
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                tracing::info!(connection = conn.name(), addr = %addr, "Sibling link up");
                run_link(&conn, stream, &policy).await;
                conn.unbind();
                tracing::warn!(connection = conn.name(), addr = %addr, "Sibling link lost");
                tokio::time::sleep(policy.reconnect_delay).await;
            }
            Err(err) => {
                tracing::debug!(
                    connection = conn.name(),
                    addr = %addr,
                    error = %err,
                    "Dial failed, will retry"
                );
                tokio::time::sleep(policy.initial_retry).await;
            }
        }
    }
}

/// Pump one live link: drain the outbound queue, correlate inbound frames,
/// sweep expired pending entries. Returns when the link dies.
async fn run_link(conn: &Arc<Connection>, stream: TcpStream, policy: &RetryPolicy) {
    let mut framed = Framed::new(stream, CoapFrameCodec::new());
    let (tx, mut rx) = mpsc::channel(SEND_QUEUE);
    conn.bind(tx);

    let mut sweep = tokio::time::interval(policy.sweep_interval);
    sweep.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(msg) => {
                    if let Err(err) = framed.send(msg).await {
                        tracing::warn!(connection = conn.name(), error = %err, "Write failed");
                        break;
                    }
                }
                None => break,
            },
            inbound = framed.next() => match inbound {
                Some(Ok(msg)) => conn.handle_inbound(msg),
                Some(Err(err)) => {
                    tracing::warn!(connection = conn.name(), error = %err, "Decode failed");
                    break;
                }
                None => break,
            },
            _ = sweep.tick() => {
                conn.expire_pending(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use trellis_core::{Message, Method, ResponseHandler, Status};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_retry: Duration::from_millis(50),
            reconnect_delay: Duration::from_millis(5),
            sweep_interval: Duration::from_secs(5),
        }
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
    async fn connects_and_becomes_visible() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let pool = ConnectorPool::with_policy(fast_policy());
        assert!(pool.get("rd").is_none());

        let conn = pool.request_connection("rd", addr.to_string());
        wait_until(|| conn.is_live()).await;
        assert!(pool.get("rd").is_some());
        assert_eq!(pool.names(), vec!["rd".to_string()]);
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn retries_until_the_sibling_appears() {
        // Reserve a port, then free it so the first dial attempts fail.
        let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let pool = ConnectorPool::with_policy(fast_policy());
        let conn = pool.request_connection("account", addr.to_string());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pool.get("account").is_none(), "not established yet");

        let listener = TcpListener::bind(addr).await.unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        wait_until(|| conn.is_live()).await;
        assert!(pool.get("account").is_some());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn redials_quickly_after_a_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let pool = ConnectorPool::with_policy(fast_policy());
        let conn = pool.request_connection("mq", addr.to_string());

        let (first, _) = listener.accept().await.unwrap();
        wait_until(|| conn.is_live()).await;

        // Kill the live link; the pool must redial within the short delay.
        drop(first);
        let redial = tokio::time::timeout(Duration::from_millis(500), listener.accept())
            .await
            .expect("no redial within the reconnect window")
            .unwrap();
        wait_until(|| conn.is_live()).await;
        assert!(pool.get("mq").is_some(), "stays visible across the drop");
        drop(redial);
    }

    #[tokio::test]
    async fn request_response_roundtrip_over_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Sibling double: answer every request with CONTENT.
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, CoapFrameCodec::new());
            while let Some(Ok(req)) = framed.next().await {
                let resp = Message::response(Status::Content, req.token)
                    .with_payload(&b"ok"[..]);
                if framed.send(resp).await.is_err() {
                    break;
                }
            }
        });

        let pool = ConnectorPool::with_policy(fast_policy());
        let conn = pool.request_connection("rd", addr.to_string());
        wait_until(|| conn.is_live()).await;

        let (tx, mut rx) = mpsc::channel(1);
        let handler: ResponseHandler = Arc::new(move |result| {
            let _ = tx.try_send(result);
        });
        conn.send_request(Message::request(Method::Get, ["oic", "res"]), handler)
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(result.status(), Some(Status::Content));
        assert_eq!(result.payload.as_ref(), b"ok");
        assert_eq!(conn.pending_count(), 0);
    }
}
