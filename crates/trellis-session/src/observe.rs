use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::{Message, RequestChannel, Token};

struct ObservationRecord {
    request: Message,
    seq: u32,
}

/// Observations a session's peer has asked this session to maintain:
/// token → original subscribe request plus the per-token sequence counter.
///
/// Every stamped message strictly increments the counter, and the
/// synchronous SUBSCRIBE response is stamped too, so the peer sees exactly
/// 1, 2, 3, … with the subscribe ack carrying 1.
#[derive(Default)]
pub struct ObservationTable {
    entries: HashMap<Token, ObservationRecord>,
}

impl ObservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. The first `next_seq` stamp (the synchronous
    /// response) yields 1. Re-subscribing under the same token restarts the
    /// counter.
    pub fn subscribe(&mut self, token: Token, request: Message) {
        self.entries.insert(token, ObservationRecord { request, seq: 0 });
    }

    /// Next sequence number to stamp on `token`, or none if the token has
    /// no live subscription (the notification must then be dropped).
    pub fn next_seq(&mut self, token: &Token) -> Option<u32> {
        let record = self.entries.get_mut(token)?;
        record.seq += 1;
        Some(record.seq)
    }

    /// Remove the subscription. Idempotent: a second call for the same token
    /// returns false and disturbs nothing else.
    pub fn unsubscribe(&mut self, token: &Token) -> bool {
        self.entries.remove(token).is_some()
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.entries.contains_key(token)
    }

    pub fn original_request(&self, token: &Token) -> Option<&Message> {
        self.entries.get(token).map(|r| &r.request)
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One relayed subscription: the original request (whose path and query are
/// replayed for the teardown unsubscribe) and the channel it went out on.
pub struct RelayEntry {
    pub request: Message,
    pub channel: Arc<dyn RequestChannel>,
}

/// Outbound channels this session is itself subscribed through, keyed by the
/// shared token. Drained on disconnect to cascade UNSUBSCRIBEs upstream.
#[derive(Default)]
pub struct RelayTable {
    entries: HashMap<Token, RelayEntry>,
}

impl RelayTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, token: Token, request: Message, channel: Arc<dyn RequestChannel>) {
        self.entries.insert(token, RelayEntry { request, channel });
    }

    pub fn remove(&mut self, token: &Token) -> Option<RelayEntry> {
        self.entries.remove(token)
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.entries.contains_key(token)
    }

    pub fn drain(&mut self) -> Vec<(Token, RelayEntry)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
