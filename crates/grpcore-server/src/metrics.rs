//! Server metrics collection
//!
//! Lock-free counters shared by every call the server dispatches.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free atomic server counters
#[derive(Debug, Default)]
pub struct ServerMetrics {
    calls_started: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    active_calls: AtomicU64,
}

impl ServerMetrics {
    /// Create a collector with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn call_started(&self) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
        self.active_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call's terminal status. Every started call ends exactly once.
    pub(crate) fn call_finished(&self, ok: bool) {
        if ok {
            self.calls_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.active_calls.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a call rejected before a handler was found.
    pub(crate) fn call_rejected(&self) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_messages_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current metrics
    ///
    /// Each counter is read atomically; the snapshot as a whole is not.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_started: self.calls_started.load(Ordering::Relaxed),
            calls_succeeded: self.calls_succeeded.load(Ordering::Relaxed),
            calls_failed: self.calls_failed.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_calls: self.active_calls.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Calls accepted, including those rejected during routing
    pub calls_started: u64,
    /// Calls that ended with `OK`
    pub calls_succeeded: u64,
    /// Calls that ended with any other status
    pub calls_failed: u64,
    /// Request messages decoded
    pub messages_received: u64,
    /// Response messages written
    pub messages_sent: u64,
    /// Calls currently being served
    pub active_calls: u64,
}

impl MetricsSnapshot {
    /// Calls that have reached a terminal status
    pub fn completed_calls(&self) -> u64 {
        self.calls_succeeded + self.calls_failed
    }

    /// Success rate as a percentage, `None` before any call completes
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.completed_calls();
        if total == 0 {
            None
        } else {
            Some((self.calls_succeeded as f64 / total as f64) * 100.0)
        }
    }
}
