use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use trellis_core::{Identity, Message, Observe, RequestChannel, SessionId, Token};

use crate::observe::{ObservationTable, RelayTable};

/// Grace period before a session that never negotiated a keepalive interval
/// is considered dead.
const DEFAULT_KEEPALIVE_GRACE: Duration = Duration::from_secs(120);

/// One transport-level connection with a peer (a device, or a sibling
/// service that connected to us).
///
/// The send queue is the exclusively-owned write side of the connection; all
/// observation and relay state is mutated by the worker that owns the
/// connection, but teardown is safe to run concurrently with a last
/// in-flight message.
pub struct Session {
    id: SessionId,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    identity: RwLock<Option<Identity>>,
    observations: Mutex<ObservationTable>,
    relays: Mutex<RelayTable>,
    keepalive_deadline: Mutex<Instant>,
    torn_down: AtomicBool,
}

impl Session {
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self {
            id: SessionId::new(),
            outbound: Mutex::new(Some(outbound)),
            identity: RwLock::new(None),
            observations: Mutex::new(ObservationTable::new()),
            relays: Mutex::new(RelayTable::new()),
            keepalive_deadline: Mutex::new(Instant::now() + DEFAULT_KEEPALIVE_GRACE),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    // ── Outbound queue ──

    /// Queue a message for the peer. Returns false if the connection is gone
    /// or the queue is full (the message is dropped, not blocked on).
    pub fn send(&self, msg: Message) -> bool {
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(
                    session_id = %self.id,
                    token = %dropped.token,
                    "Send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    // ── Identity ──

    /// Populate identity after a successful sign-in relay.
    pub fn authenticate(&self, identity: Identity) {
        tracing::info!(
            session_id = %self.id,
            uid = %identity.user_id,
            di = %identity.device_id,
            "Session authenticated"
        );
        *self.identity.write() = Some(identity);
    }

    /// Clear identity on sign-out.
    pub fn deauthenticate(&self) {
        *self.identity.write() = None;
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.read().is_some()
    }

    // ── Observation state (peer observes through us) ──

    /// Record a subscription under `token`. The first `next_seq` stamp —
    /// which belongs on the synchronous response — yields 1.
    pub fn subscribe(&self, token: Token, request: Message) {
        self.observations.lock().subscribe(token, request);
    }

    /// Sequence number for the next push on `token`, none if unsubscribed.
    pub fn next_seq(&self, token: &Token) -> Option<u32> {
        self.observations.lock().next_seq(token)
    }

    /// Drop the subscription. Idempotent.
    pub fn unsubscribe(&self, token: &Token) -> bool {
        self.observations.lock().unsubscribe(token)
    }

    pub fn is_observed(&self, token: &Token) -> bool {
        self.observations.lock().contains(token)
    }

    pub fn observation_count(&self) -> usize {
        self.observations.lock().len()
    }

    // ── Relay state (we observe upstream on the peer's behalf) ──

    pub fn record_relay(&self, token: Token, request: Message, channel: Arc<dyn RequestChannel>) {
        self.relays.lock().record(token, request, channel);
    }

    pub fn remove_relay(&self, token: &Token) -> bool {
        self.relays.lock().remove(token).is_some()
    }

    pub fn has_relay(&self, token: &Token) -> bool {
        self.relays.lock().contains(token)
    }

    /// Final termination signalled from upstream (NOTHING-marker response):
    /// both the observation and its relay entry go away immediately.
    pub fn relay_terminated(&self, token: &Token) {
        self.relays.lock().remove(token);
        self.observations.lock().unsubscribe(token);
    }

    // ── Keepalive ──

    /// Refresh the liveness deadline after a ping. The peer promises to ping
    /// every `interval_minutes`; we allow half an interval of slack.
    pub fn refresh_keepalive(&self, interval_minutes: u64) {
        let window = Duration::from_secs(interval_minutes * 60);
        *self.keepalive_deadline.lock() = Instant::now() + window + window / 2;
    }

    pub fn is_alive(&self, now: Instant) -> bool {
        now < *self.keepalive_deadline.lock()
    }

    // ── Teardown ──

    /// Graceful teardown: every still-open relayed subscription gets an
    /// UNSUBSCRIBE with its original token pushed upstream, fire-and-forget,
    /// so cooperating services do not leak subscriptions. Safe to call more
    /// than once; only the first call acts.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let relayed = self.relays.lock().drain();
        for (token, entry) in relayed {
            let mut unsubscribe = entry.request.clone();
            unsubscribe.observe = Observe::Unsubscribe;
            unsubscribe.token = token;
            tracing::debug!(
                session_id = %self.id,
                token = %token,
                channel = entry.channel.name(),
                "Cascading unsubscribe on teardown"
            );
            // The originating peer is already gone; nothing to report back to.
            let _ = entry.channel.send_oneway(unsubscribe);
        }

        let orphaned = {
            let mut observations = self.observations.lock();
            let count = observations.len();
            for token in observations.tokens() {
                observations.unsubscribe(&token);
            }
            count
        };
        if orphaned > 0 {
            tracing::debug!(session_id = %self.id, count = orphaned, "Dropped local observations");
        }

        // Dropping the sender ends the writer task and closes the socket.
        self.outbound.lock().take();
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}
