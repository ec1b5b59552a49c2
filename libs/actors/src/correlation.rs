//! Request/Reply Correlation
//!
//! Tracks in-flight requests by tag. Each entry owns the sending half of a
//! reply channel plus the number of reply slots it still expects; the caller
//! holds the receiving half as a [`Reply`].
//!
//! ```text
//! request ──► add_entry(tag, timeout, k) ──► Reply (k slots)
//!                   │
//!   reply arrives ──┼──► fulfill_next(tag) ──► oldest pending slot resolves
//!   router fan-out ─┼──► adjust_expected(tag, n)
//!   idle tick ──────┴──► sweep_expired(now) ──► pending slots reject (Timeout)
//! ```
//!
//! Slots resolve in arrival order, not per responder. An entry is removed
//! exactly once: when its last slot resolves, when it times out, or when its
//! expected count shrinks to what has already resolved.

use crate::envelope::Payload;
use crate::error::RuntimeError;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of one reply slot
pub type ReplyResult = std::result::Result<Payload, RuntimeError>;

struct Entry {
    sender: mpsc::UnboundedSender<ReplyResult>,
    slots: Arc<AtomicUsize>,
    resolved: usize,
    sent_at: Instant,
    deadline: Instant,
}

impl Entry {
    fn pending(&self) -> usize {
        self.slots.load(Ordering::Relaxed).saturating_sub(self.resolved)
    }
}

/// Pending-reply table keyed by request tag
pub struct CorrelationTable {
    entries: HashMap<u64, Entry>,
    floor: Duration,
}

impl CorrelationTable {
    /// `floor` is the minimum lifetime granted to any request
    pub fn new(floor: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            floor,
        }
    }

    /// Register a request expecting `expected` replies
    pub fn add_entry(&mut self, tag: u64, timeout: Duration, expected: usize) -> Reply {
        if expected == 0 {
            return Reply::rejected(RuntimeError::abandoned(tag, "request has no reply slots"));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let slots = Arc::new(AtomicUsize::new(expected));
        let now = Instant::now();
        let entry = Entry {
            sender,
            slots: Arc::clone(&slots),
            resolved: 0,
            sent_at: now,
            deadline: now + timeout.max(self.floor),
        };

        if self.entries.insert(tag, entry).is_some() {
            warn!(tag, "Correlation tag reused while still pending; previous entry dropped");
        }

        Reply {
            tag,
            receiver,
            slots,
        }
    }

    /// Change the total slot count of an in-flight request
    ///
    /// Returns false when the tag is no longer pending. Shrinking to (or below)
    /// the number of already-resolved slots completes the entry.
    pub fn adjust_expected(&mut self, tag: u64, new_count: usize) -> bool {
        let Some(entry) = self.entries.get_mut(&tag) else {
            debug!(tag, new_count, "Fan-out adjustment for a request that is no longer pending");
            return false;
        };

        if new_count <= entry.resolved {
            entry.slots.store(entry.resolved, Ordering::Relaxed);
            self.entries.remove(&tag);
            debug!(tag, new_count, "Request completed by fan-out shrink");
        } else {
            entry.slots.store(new_count, Ordering::Relaxed);
        }
        true
    }

    /// Resolve the oldest pending slot of `tag`
    ///
    /// Returns the number of slots still pending, or `None` for an unknown tag.
    pub fn fulfill_next(&mut self, tag: u64, value: Payload) -> Option<usize> {
        let entry = self.entries.get_mut(&tag)?;

        // Receiver may already be gone; the slot still counts as settled
        let _ = entry.sender.send(Ok(value));
        entry.resolved += 1;

        let remaining = entry.pending();
        if remaining == 0 {
            self.entries.remove(&tag);
        }
        Some(remaining)
    }

    /// Reject and remove every entry whose deadline has passed
    ///
    /// Returns the number of entries that expired.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(tag, _)| *tag)
            .collect();

        for tag in &expired {
            if let Some(entry) = self.entries.remove(tag) {
                let elapsed = now.saturating_duration_since(entry.sent_at);
                let pending = entry.pending();
                warn!(
                    tag = *tag,
                    pending,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request timed out"
                );
                for _ in 0..pending {
                    let _ = entry.sender.send(Err(RuntimeError::timeout(*tag, elapsed)));
                }
            }
        }

        expired.len()
    }

    /// Reject everything still pending; used on cold reset
    pub fn clear(&mut self, reason: &str) -> usize {
        let count = self.entries.len();
        for (tag, entry) in self.entries.drain() {
            for _ in 0..entry.pending() {
                let _ = entry.sender.send(Err(RuntimeError::abandoned(tag, reason)));
            }
        }
        count
    }

    /// Reject and remove one entry; false when the tag is not pending
    pub fn abandon(&mut self, tag: u64, reason: &str) -> bool {
        let Some(entry) = self.entries.remove(&tag) else {
            return false;
        };
        for _ in 0..entry.pending() {
            let _ = entry.sender.send(Err(RuntimeError::abandoned(tag, reason)));
        }
        true
    }

    /// Total slot count of a pending request
    pub fn expected(&self, tag: u64) -> Option<usize> {
        self.entries
            .get(&tag)
            .map(|entry| entry.slots.load(Ordering::Relaxed))
    }

    pub fn contains(&self, tag: u64) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Caller side of a request: an ordered group of reply slots
///
/// Results arrive in the order replies reach the scheduler. The stream ends
/// once the correlation entry is removed.
#[derive(Debug)]
pub struct Reply {
    tag: u64,
    receiver: mpsc::UnboundedReceiver<ReplyResult>,
    slots: Arc<AtomicUsize>,
}

impl Reply {
    /// A reply that has already failed
    pub(crate) fn rejected(error: RuntimeError) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(Err(error));
        Self {
            tag: 0,
            receiver,
            slots: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Correlation tag (0 for immediately rejected requests)
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Current number of reply slots; grows when a router expands the fan-out
    pub fn slots(&self) -> usize {
        self.slots.load(Ordering::Relaxed)
    }

    /// Next settled slot, waiting if none has settled yet
    pub async fn next(&mut self) -> Option<ReplyResult> {
        self.receiver.recv().await
    }

    /// Next settled slot if one is already available
    pub fn try_next(&mut self) -> Option<ReplyResult> {
        self.receiver.try_recv().ok()
    }

    /// Resolve with the first settled slot
    pub async fn first(mut self) -> ReplyResult {
        let tag = self.tag;
        self.receiver
            .recv()
            .await
            .unwrap_or_else(|| Err(RuntimeError::abandoned(tag, "closed without a reply")))
    }

    /// Wait for every slot to settle
    pub async fn all(mut self) -> Vec<ReplyResult> {
        let mut results = Vec::with_capacity(self.slots());
        while let Some(result) = self.receiver.recv().await {
            results.push(result);
        }
        results
    }
}

impl Stream for Reply {
    type Item = ReplyResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn table() -> CorrelationTable {
        CorrelationTable::new(Duration::from_millis(10))
    }

    #[test]
    fn test_single_slot_resolves_and_removes_entry() {
        let mut table = table();
        let mut reply = table.add_entry(1, Duration::from_millis(50), 1);

        assert_eq!(table.fulfill_next(1, json!(42)), Some(0));
        assert!(!table.contains(1));
        assert_eq!(reply.try_next(), Some(Ok(json!(42))));
        assert_eq!(table.fulfill_next(1, json!(43)), None);
    }

    #[test]
    fn test_slots_resolve_in_arrival_order() {
        let mut table = table();
        let mut reply = table.add_entry(5, Duration::from_millis(50), 2);

        assert_eq!(table.fulfill_next(5, json!("second-responder")), Some(1));
        assert!(table.contains(5));
        assert_eq!(table.fulfill_next(5, json!("first-responder")), Some(0));

        assert_eq!(reply.try_next(), Some(Ok(json!("second-responder"))));
        assert_eq!(reply.try_next(), Some(Ok(json!("first-responder"))));
        assert_eq!(reply.try_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_rejects_only_pending_slots() {
        let mut table = table();
        let reply = table.add_entry(3, Duration::from_millis(50), 2);
        table.fulfill_next(3, json!(42));

        assert_eq!(table.sweep_expired(Instant::now()), 0);
        tokio::time::advance(Duration::from_millis(51)).await;
        assert_eq!(table.sweep_expired(Instant::now()), 1);
        assert_eq!(table.sweep_expired(Instant::now()), 0);

        let results = reply.all().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok(json!(42)));
        match &results[1] {
            Err(RuntimeError::Timeout { tag, elapsed }) => {
                assert_eq!(*tag, 3);
                assert!(*elapsed >= Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_floor_extends_short_timeouts() {
        let mut table = table();
        let _reply = table.add_entry(1, Duration::from_millis(1), 1);

        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(table.sweep_expired(Instant::now()), 0);
        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(table.sweep_expired(Instant::now()), 1);
    }

    #[test]
    fn test_adjust_grows_and_shrinks() {
        let mut table = table();
        let reply = table.add_entry(8, Duration::from_millis(50), 1);

        assert!(table.adjust_expected(8, 3));
        assert_eq!(reply.slots(), 3);
        assert_eq!(table.fulfill_next(8, json!(1)), Some(2));

        // Shrinking to what already resolved completes the request
        assert!(table.adjust_expected(8, 1));
        assert!(!table.contains(8));
        assert!(!table.adjust_expected(8, 2));
    }

    #[tokio::test]
    async fn test_stream_ends_after_last_slot() {
        let mut table = table();
        let mut reply = table.add_entry(2, Duration::from_millis(50), 2);
        table.fulfill_next(2, json!("a"));
        table.fulfill_next(2, json!("b"));

        assert_eq!(reply.next().await, Some(Ok(json!("a"))));
        assert_eq!(StreamExt::next(&mut reply).await, Some(Ok(json!("b"))));
        assert_eq!(reply.next().await, None);
    }

    #[tokio::test]
    async fn test_rejected_reply_settles_immediately() {
        let reply = Reply::rejected(RuntimeError::unwired("x", "ping", "channel-capable"));
        assert_eq!(reply.tag(), 0);
        assert!(matches!(reply.first().await, Err(RuntimeError::Unwired { .. })));
    }

    #[test]
    fn test_clear_abandons_pending() {
        let mut table = table();
        let mut reply = table.add_entry(4, Duration::from_millis(50), 1);
        assert_eq!(table.clear("runtime stopped"), 1);
        assert!(table.is_empty());
        assert!(matches!(reply.try_next(), Some(Err(RuntimeError::Abandoned { tag: 4, .. }))));
    }

    #[test]
    fn test_abandon_rejects_one_entry() {
        let mut table = table();
        let mut first = table.add_entry(1, Duration::from_millis(50), 2);
        let _second = table.add_entry(2, Duration::from_millis(50), 1);

        assert!(table.abandon(1, "not queued"));
        assert!(!table.abandon(1, "not queued"));
        assert!(table.contains(2));
        assert!(matches!(first.try_next(), Some(Err(RuntimeError::Abandoned { tag: 1, .. }))));
        assert!(matches!(first.try_next(), Some(Err(RuntimeError::Abandoned { tag: 1, .. }))));
    }
}
