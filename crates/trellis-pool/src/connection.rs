use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use trellis_core::{ChannelError, Message, Observe, RequestChannel, ResponseHandler, Token};

/// How long a one-shot pending entry may wait for its response before the
/// sweeper expires it. Observe entries are exempt; they end only through
/// explicit termination.
pub const PENDING_TTL: Duration = Duration::from_secs(30);

/// Outbound queue depth towards a sibling.
pub(crate) const SEND_QUEUE: usize = 256;

struct PendingEntry {
    handler: ResponseHandler,
    /// Observe entries survive multiple notifications.
    observing: bool,
    /// One-shot entries expire; observe entries carry no deadline.
    deadline: Option<Instant>,
}

/// One named persistent connection to a sibling service.
///
/// The live writer is replaced by the maintain loop on every reconnect; the
/// pending table and the logical name outlive any individual link.
pub struct Connection {
    name: String,
    writer: Mutex<Option<mpsc::Sender<Message>>>,
    pending: DashMap<Token, PendingEntry>,
    /// Set on the first successful dial and never cleared: the pool treats
    /// the connection as present once established, even mid-reconnect.
    established: AtomicBool,
}

impl Connection {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(None),
            pending: DashMap::new(),
            established: AtomicBool::new(false),
        }
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    pub fn is_live(&self) -> bool {
        self.writer.lock().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Install the writer for a freshly-dialed link.
    pub(crate) fn bind(&self, tx: mpsc::Sender<Message>) {
        self.established.store(true, Ordering::Release);
        *self.writer.lock() = Some(tx);
    }

    /// Drop the writer after the link died. Pending one-shot handlers are
    /// dropped uninvoked; the upstream subscription state they tracked is
    /// gone with the link.
    pub(crate) fn unbind(&self) {
        *self.writer.lock() = None;
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            tracing::warn!(
                connection = %self.name,
                dropped,
                "Link lost, dropped pending entries"
            );
        }
    }

    /// Route one inbound message to its pending handler by token.
    ///
    /// A SEQUENCE-marker message is a notification: the observe handler is
    /// invoked and stays registered. Anything else is final for its token —
    /// a one-shot response, or the NOTHING-marker termination of an
    /// observation — so the entry is removed before the handler runs.
    pub(crate) fn handle_inbound(&self, msg: Message) {
        let token = msg.token;
        let notification = matches!(msg.observe, Observe::Sequence(_));

        let handler = if notification {
            match self.pending.get(&token) {
                Some(entry) if entry.observing => Some(entry.handler.clone()),
                Some(_) => None,
                None => None,
            }
        } else {
            self.pending.remove(&token).map(|(_, entry)| entry.handler)
        };

        match handler {
            Some(handler) => handler(Ok(msg)),
            None => {
                tracing::trace!(
                    connection = %self.name,
                    token = %token,
                    "No pending entry for inbound message"
                );
            }
        }
    }

    /// Expire overdue one-shot entries, invoking each handler with a
    /// timeout so callers can answer GATEWAY_TIMEOUT instead of hanging.
    pub fn expire_pending(&self, now: Instant) -> usize {
        let overdue: Vec<Token> = self
            .pending
            .iter()
            .filter(|entry| entry.deadline.is_some_and(|d| d <= now))
            .map(|entry| *entry.key())
            .collect();

        let mut expired = 0;
        for token in overdue {
            if let Some((_, entry)) = self.pending.remove(&token) {
                (entry.handler)(Err(ChannelError::Timeout(PENDING_TTL)));
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::warn!(connection = %self.name, expired, "Expired pending entries");
        }
        expired
    }

    fn write(&self, request: Message) -> Result<(), ChannelError> {
        let guard = self.writer.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(ChannelError::Unavailable(self.name.clone()));
        };
        tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Unavailable(self.name.clone()),
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }
}

impl RequestChannel for Connection {
    fn name(&self) -> &str {
        &self.name
    }

    /// Send a request and register its response handler under the token.
    /// Fails fast while the link is down — nothing is queued across an
    /// outage.
    fn send_request(
        &self,
        request: Message,
        on_response: ResponseHandler,
    ) -> Result<(), ChannelError> {
        let token = request.token;
        let observing = request.observe.is_subscribe();
        // An UNSUBSCRIBE (or any re-send under the token) overwrites the
        // retained observe entry with this one-shot wait for the ack.
        self.pending.insert(
            token,
            PendingEntry {
                handler: on_response,
                observing,
                deadline: (!observing).then(|| Instant::now() + PENDING_TTL),
            },
        );

        if let Err(err) = self.write(request) {
            self.pending.remove(&token);
            return Err(err);
        }
        Ok(())
    }

    fn send_oneway(&self, request: Message) -> Result<(), ChannelError> {
        // A teardown unsubscribe also ends any retained observe entry.
        if request.observe.is_unsubscribe() {
            self.pending.remove(&request.token);
        }
        self.write(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trellis_core::{Method, Status};

    fn live_connection() -> (Arc<Connection>, mpsc::Receiver<Message>) {
        let conn = Arc::new(Connection::new("rd"));
        let (tx, rx) = mpsc::channel(SEND_QUEUE);
        conn.bind(tx);
        (conn, rx)
    }

    fn capture() -> (
        ResponseHandler,
        Arc<parking_lot::Mutex<Vec<Result<Message, ChannelError>>>>,
    ) {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: ResponseHandler = Arc::new(move |result| sink.lock().push(result));
        (handler, seen)
    }

    #[test]
    fn one_shot_handler_runs_exactly_once() {
        let (conn, mut rx) = live_connection();
        let (handler, seen) = capture();

        let request = Message::request(Method::Get, ["oic", "res"]);
        let token = request.token;
        conn.send_request(request, handler).unwrap();
        assert_eq!(rx.try_recv().unwrap().token, token);
        assert_eq!(conn.pending_count(), 1);

        conn.handle_inbound(Message::response(Status::Content, token));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(conn.pending_count(), 0);

        // A duplicate response finds no entry.
        conn.handle_inbound(Message::response(Status::Content, token));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn observe_handler_survives_notifications_until_termination() {
        let (conn, _rx) = live_connection();
        let (handler, seen) = capture();

        let request =
            Message::request(Method::Get, ["oic", "mq", "t"]).with_observe(Observe::Subscribe);
        let token = request.token;
        conn.send_request(request, handler).unwrap();

        for n in 1..=3 {
            conn.handle_inbound(
                Message::response(Status::Content, token).with_observe(Observe::Sequence(n)),
            );
        }
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(conn.pending_count(), 1);

        // NOTHING marker: final termination, entry removed.
        conn.handle_inbound(Message::response(Status::Content, token));
        assert_eq!(seen.lock().len(), 4);
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn send_fails_fast_when_link_is_down() {
        let conn = Connection::new("account");
        let (handler, seen) = capture();

        let err = conn
            .send_request(Message::request(Method::Get, ["x"]), handler)
            .unwrap_err();
        assert!(matches!(err, ChannelError::Unavailable(_)));
        assert_eq!(conn.pending_count(), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn unbind_drops_pending_without_invoking() {
        let (conn, _rx) = live_connection();
        let (handler, seen) = capture();
        conn.send_request(Message::request(Method::Get, ["x"]), handler)
            .unwrap();

        conn.unbind();
        assert_eq!(conn.pending_count(), 0);
        assert!(seen.lock().is_empty());
        assert!(!conn.is_live());
        // Established stays set: the pool treats the connection as present.
        assert!(conn.is_established());
    }

    #[test]
    fn expiry_times_out_one_shot_but_not_observe() {
        let (conn, _rx) = live_connection();
        let (one_shot, one_seen) = capture();
        let (observer, obs_seen) = capture();

        conn.send_request(Message::request(Method::Get, ["a"]), one_shot)
            .unwrap();
        conn.send_request(
            Message::request(Method::Get, ["b"]).with_observe(Observe::Subscribe),
            observer,
        )
        .unwrap();

        let expired = conn.expire_pending(Instant::now() + PENDING_TTL + Duration::from_secs(1));
        assert_eq!(expired, 1);
        assert!(matches!(one_seen.lock()[0], Err(ChannelError::Timeout(_))));
        assert!(obs_seen.lock().is_empty());
        assert_eq!(conn.pending_count(), 1);
    }

    #[test]
    fn oneway_unsubscribe_clears_retained_entry() {
        let (conn, mut rx) = live_connection();
        let (handler, _seen) = capture();

        let subscribe =
            Message::request(Method::Get, ["oic", "mq", "t"]).with_observe(Observe::Subscribe);
        let token = subscribe.token;
        conn.send_request(subscribe, handler).unwrap();
        assert_eq!(conn.pending_count(), 1);
        let _ = rx.try_recv();

        let unsubscribe = Message::request(Method::Get, ["oic", "mq", "t"])
            .with_observe(Observe::Unsubscribe)
            .with_token(token);
        conn.send_oneway(unsubscribe).unwrap();
        assert_eq!(conn.pending_count(), 0);
        assert_eq!(rx.try_recv().unwrap().observe, Observe::Unsubscribe);
    }
}
