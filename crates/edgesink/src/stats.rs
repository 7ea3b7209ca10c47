// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion counters
//!
//! Monotonic, lock-free counters shared across concurrent ingests. Reads
//! never observe a mid-increment value; a snapshot is a set of independent
//! atomic loads.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Live ingestion statistics
#[derive(Debug)]
pub struct IngestStats {
    /// Payloads handed to the coordinator
    pub messages_received: AtomicU64,

    /// Payloads persisted to both sinks
    pub messages_accepted: AtomicU64,

    /// Payloads that failed decoding
    pub messages_rejected: AtomicU64,

    /// Messages whose timeseries write failed after retries
    pub timeseries_failures: AtomicU64,

    /// Messages whose metadata upsert failed after retries
    pub metadata_failures: AtomicU64,

    /// Individual sink-call retries
    pub sink_retries: AtomicU64,

    /// Coordinator creation time
    pub created: Instant,
}

impl IngestStats {
    /// Create zeroed stats
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_accepted: AtomicU64::new(0),
            messages_rejected: AtomicU64::new(0),
            timeseries_failures: AtomicU64::new(0),
            metadata_failures: AtomicU64::new(0),
            sink_retries: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.messages_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeseries_failure(&self) {
        self.timeseries_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_metadata_failure(&self) {
        self.metadata_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.sink_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_accepted: self.messages_accepted.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            timeseries_failures: self.timeseries_failures.load(Ordering::Relaxed),
            metadata_failures: self.metadata_failures.load(Ordering::Relaxed),
            sink_retries: self.sink_retries.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of ingestion statistics
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatsSnapshot {
    pub messages_received: u64,
    pub messages_accepted: u64,
    pub messages_rejected: u64,
    pub timeseries_failures: u64,
    pub metadata_failures: u64,
    pub sink_retries: u64,
    pub uptime_secs: u64,
}

impl IngestStatsSnapshot {
    /// Messages that were neither accepted nor rejected: at least one sink
    /// failed after retries. Transiently includes in-flight messages.
    pub fn partial_failures(&self) -> u64 {
        self.messages_received
            .saturating_sub(self.messages_accepted)
            .saturating_sub(self.messages_rejected)
    }

    /// Calculate messages per second.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.messages_received as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}
