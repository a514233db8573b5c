// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Statistics for a server route.
#[derive(Debug)]
pub struct RouteStats {
    /// Queue the route consumes.
    pub queue: String,

    /// Requests delivered to the handler.
    pub requests_received: AtomicU64,

    /// Replies published and acknowledged.
    pub replies_sent: AtomicU64,

    /// Replies whose publish failed (request nacked, not requeued).
    pub reply_failures: AtomicU64,

    /// Handler invocations that returned an error.
    pub handler_errors: AtomicU64,

    /// Requests that could not be decoded.
    pub decode_errors: AtomicU64,

    /// Route creation time.
    pub created: Instant,
}

impl RouteStats {
    /// Create new stats.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            requests_received: AtomicU64::new(0),
            replies_sent: AtomicU64::new(0),
            reply_failures: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub(crate) fn record_request(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reply(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reply_failure(&self) {
        self.reply_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> RouteStatsSnapshot {
        RouteStatsSnapshot {
            queue: self.queue.clone(),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            reply_failures: self.reply_failures.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of route statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RouteStatsSnapshot {
    pub queue: String,
    pub requests_received: u64,
    pub replies_sent: u64,
    pub reply_failures: u64,
    pub handler_errors: u64,
    pub decode_errors: u64,
    pub uptime_secs: u64,
}

impl RouteStatsSnapshot {
    /// Requests that were neither answered nor failed yet.
    pub fn in_flight(&self) -> u64 {
        self.requests_received
            .saturating_sub(self.replies_sent)
            .saturating_sub(self.reply_failures)
            .saturating_sub(self.handler_errors)
            .saturating_sub(self.decode_errors)
    }

    /// Fraction of requests that ended in an error.
    pub fn error_rate(&self) -> f64 {
        if self.requests_received > 0 {
            (self.reply_failures + self.handler_errors) as f64 / self.requests_received as f64
        } else {
            0.0
        }
    }
}
