//! Per-session outbound mailbox with pull semantics.
//!
//! Clients poll with their last-seen message id: everything at or below that
//! id is acknowledged (removed), then up to [`PULL_BATCH`] still-unexpired
//! entries are returned in arrival order. Entries also carry their own expiry
//! so the sweep can prune mail nobody pulled.

use serde_json::Value;
use std::collections::VecDeque;
use std::time::Instant;

/// Maximum entries returned by a single pull.
pub const PULL_BATCH: usize = 64;

/// One buffered outbound message.
#[derive(Debug, Clone)]
pub struct MailboxEntry {
    /// Per-session id, strictly increasing in arrival order.
    pub id: u64,
    /// Message type name the session subscribed to.
    pub type_name: String,
    /// Client payload.
    pub payload: Value,
    pub(crate) expires_at: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    next_id: u64,
    entries: VecDeque<MailboxEntry>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: VecDeque::new(),
        }
    }

    /// Buffers a message; returns its mailbox id.
    pub fn push(&mut self, type_name: &str, payload: Value, expires_at: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(MailboxEntry {
            id,
            type_name: type_name.to_string(),
            payload,
            expires_at,
        });
        id
    }

    /// Acknowledges everything with id <= `last_seen`, drops expired entries,
    /// and returns up to [`PULL_BATCH`] of the rest in arrival order.
    /// Acknowledged entries are gone for good, which makes repeated pulls
    /// with the same `last_seen` idempotent.
    pub fn pull(&mut self, last_seen: u64, now: Instant) -> Vec<MailboxEntry> {
        self.entries
            .retain(|entry| entry.id > last_seen && now < entry.expires_at);
        self.entries.iter().take(PULL_BATCH).cloned().collect()
    }

    /// Drops entries past their own expiry; returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| now < entry.expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    #[test]
    fn pull_acknowledges_then_returns_in_arrival_order() {
        let mut mailbox = Mailbox::new();
        for i in 1..=5 {
            mailbox.push("t.a", json!({ "n": i }), far());
        }

        let now = Instant::now();
        let batch = mailbox.pull(2, now);
        let ids: Vec<u64> = batch.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(mailbox.len(), 3);
    }

    #[test]
    fn repeated_pull_is_idempotent_for_acknowledged_ids() {
        let mut mailbox = Mailbox::new();
        for i in 1..=3 {
            mailbox.push("t.a", json!({ "n": i }), far());
        }

        let now = Instant::now();
        let first: Vec<u64> = mailbox.pull(3, now).iter().map(|e| e.id).collect();
        assert!(first.is_empty());
        // Acked entries must never reappear.
        let second: Vec<u64> = mailbox.pull(3, now).iter().map(|e| e.id).collect();
        assert!(second.is_empty());
        assert_eq!(mailbox.len(), 0);
    }

    #[test]
    fn pull_is_capped_at_batch_size() {
        let mut mailbox = Mailbox::new();
        for i in 0..(PULL_BATCH as u64 + 10) {
            mailbox.push("t.a", json!({ "n": i }), far());
        }

        let batch = mailbox.pull(0, Instant::now());
        assert_eq!(batch.len(), PULL_BATCH);
        assert_eq!(batch[0].id, 1);
        // Nothing was acknowledged, so the tail stays buffered.
        assert_eq!(mailbox.len(), PULL_BATCH + 10);
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let mut mailbox = Mailbox::new();
        let now = Instant::now();
        mailbox.push("t.a", json!({ "n": 1 }), now); // already expired
        mailbox.push("t.a", json!({ "n": 2 }), far());

        let batch = mailbox.pull(0, now);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, 2);
    }

    #[test]
    fn prune_reports_removed_count() {
        let mut mailbox = Mailbox::new();
        let now = Instant::now();
        mailbox.push("t.a", json!({}), now);
        mailbox.push("t.a", json!({}), now);
        mailbox.push("t.a", json!({}), far());

        assert_eq!(mailbox.prune(now), 2);
        assert_eq!(mailbox.len(), 1);
    }

    #[test]
    fn ids_keep_increasing_after_acknowledgement() {
        let mut mailbox = Mailbox::new();
        let a = mailbox.push("t.a", json!({}), far());
        mailbox.pull(a, Instant::now());
        let b = mailbox.push("t.a", json!({}), far());
        assert!(b > a);
    }
}
