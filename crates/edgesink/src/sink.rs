// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sink abstractions
//!
//! Defines the two persistence capabilities the coordinator dispatches to,
//! plus in-memory implementations used as reference backends and test fakes.
//!
//! Sink calls are synchronous; the coordinator runs them on the blocking
//! pool with a per-attempt timeout, so implementations may block.

use crate::reading::{DeviceMetadataRecord, TimeseriesPoint};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Sink failure taxonomy
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SinkError {
    /// Backend unreachable or its worker died
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded the per-attempt timeout
    #[error("sink call exceeded {0:?}")]
    Timeout(Duration),

    /// Backend refused the write
    #[error("sink rejected write: {0}")]
    Rejected(String),
}

/// Append-only timeseries storage
///
/// Keyed by (device, series, metric, time). Points are immutable once
/// written; duplicates from redelivery are tolerated, not errors.
///
/// # Implementations
///
/// - `MemoryTimeseriesSink` -- reference and tests
/// - `SqliteTimeseriesSink` -- durable, zero-dependency
pub trait TimeseriesSink: Send + Sync {
    /// Append a batch of points. Either all points in the batch are
    /// durably recorded or none are assumed recorded.
    fn write(&self, points: &[TimeseriesPoint]) -> Result<(), SinkError>;

    /// Query points for a device within a time range
    ///
    /// # Arguments
    ///
    /// - `device_id` -- Device identifier
    /// - `start_ns` -- Start timestamp (Unix nanoseconds, inclusive)
    /// - `end_ns` -- End timestamp (Unix nanoseconds, inclusive)
    fn query_range(
        &self,
        device_id: &str,
        start_ns: i64,
        end_ns: i64,
    ) -> Result<Vec<TimeseriesPoint>, SinkError>;

    /// Total points stored
    fn count(&self) -> Result<usize, SinkError>;

    /// Delete all points (for tests and operator tooling)
    fn clear(&self) -> Result<(), SinkError>;
}

/// Latest-state storage, one record per device
///
/// Upserts are last-writer-wins in the order the coordinator observes
/// messages; out-of-order transport delivery may leave an older message's
/// data as "latest".
pub trait MetadataStore: Send + Sync {
    /// Insert or overwrite the record for `record.device_id`
    fn upsert(&self, record: &DeviceMetadataRecord) -> Result<(), SinkError>;

    /// Fetch the current record for a device
    fn get(&self, device_id: &str) -> Result<Option<DeviceMetadataRecord>, SinkError>;

    /// All tracked device records
    fn devices(&self) -> Result<Vec<DeviceMetadataRecord>, SinkError>;

    /// Number of devices tracked
    fn count(&self) -> Result<usize, SinkError>;

    /// Delete all records (for tests and operator tooling)
    fn clear(&self) -> Result<(), SinkError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory timeseries sink
///
/// Records batch boundaries so tests can assert batching behavior.
pub struct MemoryTimeseriesSink {
    points: Mutex<Vec<TimeseriesPoint>>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MemoryTimeseriesSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self {
            points: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of all stored points
    pub fn points(&self) -> Vec<TimeseriesPoint> {
        let points = match self.points.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        points.clone()
    }

    /// Sizes of the write batches received, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        let sizes = match self.batch_sizes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sizes.clone()
    }
}

impl Default for MemoryTimeseriesSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeseriesSink for MemoryTimeseriesSink {
    fn write(&self, points: &[TimeseriesPoint]) -> Result<(), SinkError> {
        // Single lock covers the whole batch: all-or-nothing
        let mut stored = match self.points.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        stored.extend_from_slice(points);
        drop(stored);

        let mut sizes = match self.batch_sizes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sizes.push(points.len());

        Ok(())
    }

    fn query_range(
        &self,
        device_id: &str,
        start_ns: i64,
        end_ns: i64,
    ) -> Result<Vec<TimeseriesPoint>, SinkError> {
        let points = match self.points.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut matching: Vec<_> = points
            .iter()
            .filter(|p| {
                p.device_id == device_id
                    && p.timestamp_ns() >= start_ns
                    && p.timestamp_ns() <= end_ns
            })
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.timestamp_ns());

        Ok(matching)
    }

    fn count(&self) -> Result<usize, SinkError> {
        let points = match self.points.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(points.len())
    }

    fn clear(&self) -> Result<(), SinkError> {
        let mut points = match self.points.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        points.clear();
        drop(points);

        let mut sizes = match self.batch_sizes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sizes.clear();
        Ok(())
    }
}

/// In-memory metadata store
pub struct MemoryMetadataStore {
    records: Mutex<HashMap<String, DeviceMetadataRecord>>,
    upserts: Mutex<u64>,
}

impl MemoryMetadataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            upserts: Mutex::new(0),
        }
    }

    /// Total upsert calls received
    pub fn upsert_count(&self) -> u64 {
        let upserts = match self.upserts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *upserts
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn upsert(&self, record: &DeviceMetadataRecord) -> Result<(), SinkError> {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.insert(record.device_id.clone(), record.clone());
        drop(records);

        let mut upserts = match self.upserts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *upserts += 1;

        Ok(())
    }

    fn get(&self, device_id: &str) -> Result<Option<DeviceMetadataRecord>, SinkError> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(records.get(device_id).cloned())
    }

    fn devices(&self) -> Result<Vec<DeviceMetadataRecord>, SinkError> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(records.values().cloned().collect())
    }

    fn count(&self) -> Result<usize, SinkError> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(records.len())
    }

    fn clear(&self) -> Result<(), SinkError> {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.clear();
        Ok(())
    }
}
