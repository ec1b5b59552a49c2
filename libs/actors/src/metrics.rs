//! Runtime Metrics
//!
//! Relaxed atomic counters bumped from the scheduler and facades, read back as
//! a plain [`RuntimeStats`] snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Scheduler-wide counters
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub ticks: AtomicU64,
    pub idle_ticks: AtomicU64,
    pub envelopes_enqueued: AtomicU64,
    pub envelopes_delivered: AtomicU64,
    /// Dropped at a stub handler or unbound port
    pub envelopes_dropped: AtomicU64,
    /// Sends that found no target
    pub unwired_sends: AtomicU64,
    pub requests_opened: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub requests_timed_out: AtomicU64,
    pub replies_matched: AtomicU64,
    pub replies_orphaned: AtomicU64,
    pub handler_panics: AtomicU64,
}

impl RuntimeMetrics {
    pub fn record_tick(&self, idle: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if idle {
            self.idle_ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_enqueued(&self, count: usize) {
        self.envelopes_enqueued.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.envelopes_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.envelopes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unwired(&self) {
        self.unwired_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_opened(&self) {
        self.requests_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeouts(&self, count: usize) {
        self.requests_timed_out.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a reply delivery; `matched` is false for late or duplicate replies
    pub fn record_reply(&self, matched: bool) {
        if matched {
            self.replies_matched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.replies_orphaned.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Get metrics snapshot
    pub fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            envelopes_enqueued: self.envelopes_enqueued.load(Ordering::Relaxed),
            envelopes_delivered: self.envelopes_delivered.load(Ordering::Relaxed),
            envelopes_dropped: self.envelopes_dropped.load(Ordering::Relaxed),
            unwired_sends: self.unwired_sends.load(Ordering::Relaxed),
            requests_opened: self.requests_opened.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            replies_matched: self.replies_matched.load(Ordering::Relaxed),
            replies_orphaned: self.replies_orphaned.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RuntimeMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub idle_ticks: u64,
    pub envelopes_enqueued: u64,
    pub envelopes_delivered: u64,
    pub envelopes_dropped: u64,
    pub unwired_sends: u64,
    pub requests_opened: u64,
    pub requests_rejected: u64,
    pub requests_timed_out: u64,
    pub replies_matched: u64,
    pub replies_orphaned: u64,
    pub handler_panics: u64,
}

impl RuntimeStats {
    /// Share of ticks that found the outbound queue empty
    pub fn idle_ratio(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        self.idle_ticks as f64 / self.ticks as f64
    }
}
