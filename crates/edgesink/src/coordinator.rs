// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion coordinator
//!
//! Receives raw payloads, decodes them, and dispatches the derived views to
//! both sinks. Every failure mode folds into an [`IngestOutcome`]; nothing
//! unwinds past the coordinator into the delivery path.
//!
//! # Operation
//!
//! 1. Decode the payload (a reject touches no sink)
//! 2. Derive the timeseries batch and the latest-state record
//! 3. Dispatch to both sinks independently and concurrently
//! 4. Run each sink call on the blocking pool, one timeout per attempt,
//!    retrying up to the configured bound
//! 5. Fold the per-sink results into one outcome and count it

use crate::codec::{self, DecodeError};
use crate::reading::DeviceMetadataRecord;
use crate::sink::{MetadataStore, SinkError, TimeseriesSink};
use crate::stats::{IngestStats, IngestStatsSnapshot};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Bounded retry policy for sink calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per sink call (values below 1 behave as 1)
    pub max_attempts: u32,

    /// Per-attempt timeout; exceeding it fails that attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of ingesting one raw payload
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Decoded and durably written to both sinks
    Accepted,

    /// Failed decoding; no sink was called
    Rejected(DecodeError),

    /// Decoded, but one or both sinks failed after retries
    PartiallyPersisted(SinkFailures),
}

impl IngestOutcome {
    /// True for fully persisted messages
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Which sink(s) ultimately failed, with the last error observed for each
#[derive(Debug, Clone, PartialEq)]
pub struct SinkFailures {
    /// Timeseries write failure, if any
    pub timeseries: Option<SinkError>,

    /// Metadata upsert failure, if any
    pub metadata: Option<SinkError>,
}

impl fmt::Display for SinkFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.timeseries, &self.metadata) {
            (Some(ts), Some(md)) => write!(f, "timeseries: {}; metadata: {}", ts, md),
            (Some(ts), None) => write!(f, "timeseries: {}", ts),
            (None, Some(md)) => write!(f, "metadata: {}", md),
            (None, None) => f.write_str("no sink failures"),
        }
    }
}

/// Ingestion Coordinator
///
/// Safe to call from any number of tasks concurrently: sinks are shared
/// behind `Arc`, counters are atomic, and no lock serializes unrelated
/// ingests.
///
/// # Type Parameters
///
/// - `T` -- Timeseries sink backend (e.g., `SqliteTimeseriesSink`)
/// - `M` -- Metadata store backend (e.g., `SqliteMetadataStore`)
pub struct IngestCoordinator<T: TimeseriesSink, M: MetadataStore> {
    timeseries: Arc<T>,
    metadata: Arc<M>,
    retry: RetryPolicy,
    stats: Arc<IngestStats>,
}

impl<T: TimeseriesSink + 'static, M: MetadataStore + 'static> IngestCoordinator<T, M> {
    /// Create a coordinator over injected sinks
    pub fn new(timeseries: Arc<T>, metadata: Arc<M>, retry: RetryPolicy) -> Self {
        Self {
            timeseries,
            metadata,
            retry,
            stats: Arc::new(IngestStats::new()),
        }
    }

    /// Get snapshot of current stats.
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    /// Ingest one raw payload.
    ///
    /// Exactly one outcome per call; decode rejects are terminal and touch
    /// no sink, sink failures are retried within the policy bound and then
    /// surfaced in the outcome.
    pub async fn ingest(&self, raw: &[u8]) -> IngestOutcome {
        self.stats.record_received();

        let reading = match codec::decode(raw) {
            Ok(reading) => reading,
            Err(e) => {
                self.stats.record_rejected();
                tracing::warn!("Rejected payload: {}", e);
                return IngestOutcome::Rejected(e);
            }
        };

        let device_id = reading.device_id.clone();
        let points = Arc::new(reading.to_points());
        let point_count = points.len();
        let record = Arc::new(DeviceMetadataRecord::from_reading(&reading, Utc::now()));

        let timeseries = Arc::clone(&self.timeseries);
        let metadata = Arc::clone(&self.metadata);

        // Both sinks get their attempt regardless of the other's result.
        let (timeseries_result, metadata_result) = tokio::join!(
            self.call_with_retries("timeseries", move || timeseries.write(&points)),
            self.call_with_retries("metadata", move || metadata.upsert(&record)),
        );

        match (timeseries_result, metadata_result) {
            (Ok(()), Ok(())) => {
                self.stats.record_accepted();
                tracing::trace!(
                    "Ingested {} points + metadata for device {}",
                    point_count,
                    device_id
                );
                IngestOutcome::Accepted
            }
            (timeseries_result, metadata_result) => {
                let failures = SinkFailures {
                    timeseries: timeseries_result.err(),
                    metadata: metadata_result.err(),
                };
                if failures.timeseries.is_some() {
                    self.stats.record_timeseries_failure();
                }
                if failures.metadata.is_some() {
                    self.stats.record_metadata_failure();
                }
                tracing::error!("Partial persist for device {}: {}", device_id, failures);
                IngestOutcome::PartiallyPersisted(failures)
            }
        }
    }

    /// Run one sink call with bounded retries.
    ///
    /// Each attempt runs on the blocking pool under the per-attempt timeout.
    /// A timed-out attempt is abandoned (it may still complete in the
    /// background; both sink contracts tolerate the resulting re-write).
    /// A panic inside the sink surfaces as `SinkError::Unavailable`.
    async fn call_with_retries<F>(&self, sink: &'static str, op: F) -> Result<(), SinkError>
    where
        F: Fn() -> Result<(), SinkError> + Clone + Send + 'static,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = SinkError::Unavailable("no attempt made".to_string());

        for attempt in 1..=attempts {
            let call = tokio::task::spawn_blocking(op.clone());

            let result = match tokio::time::timeout(self.retry.attempt_timeout, call).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(SinkError::Unavailable(format!(
                    "{} sink worker failed: {}",
                    sink, join_error
                ))),
                Err(_) => Err(SinkError::Timeout(self.retry.attempt_timeout)),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt < attempts {
                        self.stats.record_retry();
                        tracing::warn!(
                            "{} sink attempt {}/{} failed: {} (retrying)",
                            sink,
                            attempt,
                            attempts,
                            e
                        );
                    } else {
                        tracing::warn!(
                            "{} sink attempt {}/{} failed: {}",
                            sink,
                            attempt,
                            attempts,
                            e
                        );
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::TimeseriesPoint;
    use crate::sink::{MemoryMetadataStore, MemoryTimeseriesSink};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn payload(device_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "device_id": device_id,
            "timestamp": "2024-01-01T00:00:00Z",
            "sensors": {"temperature": 22.0, "humidity": 40.0},
            "status": {"battery": 80}
        }))
        .unwrap()
    }

    fn coordinator_with_policy(
        retry: RetryPolicy,
    ) -> (
        IngestCoordinator<MemoryTimeseriesSink, MemoryMetadataStore>,
        Arc<MemoryTimeseriesSink>,
        Arc<MemoryMetadataStore>,
    ) {
        let timeseries = Arc::new(MemoryTimeseriesSink::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let coordinator =
            IngestCoordinator::new(Arc::clone(&timeseries), Arc::clone(&metadata), retry);
        (coordinator, timeseries, metadata)
    }

    // --- failure-injection fakes -------------------------------------------

    struct FailingTimeseriesSink;

    impl TimeseriesSink for FailingTimeseriesSink {
        fn write(&self, _points: &[TimeseriesPoint]) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("backend down".to_string()))
        }
        fn query_range(
            &self,
            _device_id: &str,
            _start_ns: i64,
            _end_ns: i64,
        ) -> Result<Vec<TimeseriesPoint>, SinkError> {
            Ok(Vec::new())
        }
        fn count(&self) -> Result<usize, SinkError> {
            Ok(0)
        }
        fn clear(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct FailingMetadataStore;

    impl MetadataStore for FailingMetadataStore {
        fn upsert(&self, _record: &DeviceMetadataRecord) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("backend down".to_string()))
        }
        fn get(&self, _device_id: &str) -> Result<Option<DeviceMetadataRecord>, SinkError> {
            Ok(None)
        }
        fn devices(&self) -> Result<Vec<DeviceMetadataRecord>, SinkError> {
            Ok(Vec::new())
        }
        fn count(&self) -> Result<usize, SinkError> {
            Ok(0)
        }
        fn clear(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    /// Fails the first `failures` write calls, then delegates to memory
    struct FlakyTimeseriesSink {
        inner: MemoryTimeseriesSink,
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    impl FlakyTimeseriesSink {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryTimeseriesSink::new(),
                failures_left: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl TimeseriesSink for FlakyTimeseriesSink {
        fn write(&self, points: &[TimeseriesPoint]) -> Result<(), SinkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(SinkError::Unavailable("transient outage".to_string()));
            }
            self.inner.write(points)
        }
        fn query_range(
            &self,
            device_id: &str,
            start_ns: i64,
            end_ns: i64,
        ) -> Result<Vec<TimeseriesPoint>, SinkError> {
            self.inner.query_range(device_id, start_ns, end_ns)
        }
        fn count(&self) -> Result<usize, SinkError> {
            self.inner.count()
        }
        fn clear(&self) -> Result<(), SinkError> {
            self.inner.clear()
        }
    }

    struct SlowTimeseriesSink {
        delay: Duration,
    }

    impl TimeseriesSink for SlowTimeseriesSink {
        fn write(&self, _points: &[TimeseriesPoint]) -> Result<(), SinkError> {
            std::thread::sleep(self.delay);
            Ok(())
        }
        fn query_range(
            &self,
            _device_id: &str,
            _start_ns: i64,
            _end_ns: i64,
        ) -> Result<Vec<TimeseriesPoint>, SinkError> {
            Ok(Vec::new())
        }
        fn count(&self) -> Result<usize, SinkError> {
            Ok(0)
        }
        fn clear(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct PanickingTimeseriesSink;

    impl TimeseriesSink for PanickingTimeseriesSink {
        fn write(&self, _points: &[TimeseriesPoint]) -> Result<(), SinkError> {
            panic!("sink exploded");
        }
        fn query_range(
            &self,
            _device_id: &str,
            _start_ns: i64,
            _end_ns: i64,
        ) -> Result<Vec<TimeseriesPoint>, SinkError> {
            Ok(Vec::new())
        }
        fn count(&self) -> Result<usize, SinkError> {
            Ok(0)
        }
        fn clear(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    // --- tests ---------------------------------------------------------------

    #[tokio::test]
    async fn test_ingest_accepted() {
        let (coordinator, timeseries, metadata) = coordinator_with_policy(RetryPolicy::default());

        let outcome = coordinator.ingest(&payload("edge-1")).await;
        assert_eq!(outcome, IngestOutcome::Accepted);

        // 2 sensors + 1 status entry arrive as one batch
        assert_eq!(timeseries.batch_sizes(), vec![3]);
        assert_eq!(timeseries.count().unwrap(), 3);

        let record = metadata.get("edge-1").unwrap().unwrap();
        assert_eq!(record.status["battery"], 80.0);
        assert_eq!(record.last_payload.sensors["temperature"], 22.0);

        let stats = coordinator.stats();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.messages_accepted, 1);
        assert_eq!(stats.messages_rejected, 0);
    }

    #[tokio::test]
    async fn test_ingest_rejected_touches_no_sink() {
        let (coordinator, timeseries, metadata) = coordinator_with_policy(RetryPolicy::default());

        let outcome = coordinator.ingest(b"{{{ not json").await;
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(DecodeError::Malformed(_))
        ));

        let missing_id = serde_json::to_vec(&json!({"timestamp": "2024-01-01T00:00:00Z"})).unwrap();
        let outcome = coordinator.ingest(&missing_id).await;
        assert_eq!(
            outcome,
            IngestOutcome::Rejected(DecodeError::MissingField("device_id"))
        );

        assert!(timeseries.batch_sizes().is_empty());
        assert_eq!(metadata.upsert_count(), 0);

        let stats = coordinator.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.messages_rejected, 2);
        assert_eq!(stats.messages_accepted, 0);
    }

    #[tokio::test]
    async fn test_partial_failure_isolates_sinks() {
        let timeseries = Arc::new(FailingTimeseriesSink);
        let metadata = Arc::new(MemoryMetadataStore::new());
        let coordinator = IngestCoordinator::new(
            Arc::clone(&timeseries),
            Arc::clone(&metadata),
            RetryPolicy {
                max_attempts: 2,
                attempt_timeout: Duration::from_secs(1),
            },
        );

        let outcome = coordinator.ingest(&payload("edge-1")).await;

        match outcome {
            IngestOutcome::PartiallyPersisted(failures) => {
                assert!(matches!(failures.timeseries, Some(SinkError::Unavailable(_))));
                assert!(failures.metadata.is_none());
            }
            other => panic!("expected PartiallyPersisted, got {:?}", other),
        }

        // The metadata upsert still happened
        assert!(metadata.get("edge-1").unwrap().is_some());

        let stats = coordinator.stats();
        assert_eq!(stats.timeseries_failures, 1);
        assert_eq!(stats.metadata_failures, 0);
        assert_eq!(stats.messages_accepted, 0);
    }

    #[tokio::test]
    async fn test_both_sinks_failing() {
        let coordinator = IngestCoordinator::new(
            Arc::new(FailingTimeseriesSink),
            Arc::new(FailingMetadataStore),
            RetryPolicy {
                max_attempts: 1,
                attempt_timeout: Duration::from_secs(1),
            },
        );

        let outcome = coordinator.ingest(&payload("edge-1")).await;

        match outcome {
            IngestOutcome::PartiallyPersisted(failures) => {
                assert!(failures.timeseries.is_some());
                assert!(failures.metadata.is_some());
            }
            other => panic!("expected PartiallyPersisted, got {:?}", other),
        }

        let stats = coordinator.stats();
        assert_eq!(stats.timeseries_failures, 1);
        assert_eq!(stats.metadata_failures, 1);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let timeseries = Arc::new(FlakyTimeseriesSink::new(2));
        let metadata = Arc::new(MemoryMetadataStore::new());
        let coordinator = IngestCoordinator::new(
            Arc::clone(&timeseries),
            metadata,
            RetryPolicy {
                max_attempts: 3,
                attempt_timeout: Duration::from_secs(1),
            },
        );

        let outcome = coordinator.ingest(&payload("edge-1")).await;
        assert_eq!(outcome, IngestOutcome::Accepted);
        assert_eq!(timeseries.attempts(), 3);
        assert_eq!(timeseries.count().unwrap(), 3);
        assert_eq!(coordinator.stats().sink_retries, 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let timeseries = Arc::new(FlakyTimeseriesSink::new(10));
        let metadata = Arc::new(MemoryMetadataStore::new());
        let coordinator = IngestCoordinator::new(
            Arc::clone(&timeseries),
            metadata,
            RetryPolicy {
                max_attempts: 3,
                attempt_timeout: Duration::from_secs(1),
            },
        );

        let outcome = coordinator.ingest(&payload("edge-1")).await;
        assert!(matches!(outcome, IngestOutcome::PartiallyPersisted(_)));

        // Bounded: exactly max_attempts calls, then surfaced
        assert_eq!(timeseries.attempts(), 3);
        assert_eq!(timeseries.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let timeout = Duration::from_millis(50);
        let coordinator = IngestCoordinator::new(
            Arc::new(SlowTimeseriesSink {
                delay: Duration::from_millis(400),
            }),
            Arc::new(MemoryMetadataStore::new()),
            RetryPolicy {
                max_attempts: 2,
                attempt_timeout: timeout,
            },
        );

        let outcome = coordinator.ingest(&payload("edge-1")).await;

        match outcome {
            IngestOutcome::PartiallyPersisted(failures) => {
                assert_eq!(failures.timeseries, Some(SinkError::Timeout(timeout)));
            }
            other => panic!("expected PartiallyPersisted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_sink_contained() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let coordinator = IngestCoordinator::new(
            Arc::new(PanickingTimeseriesSink),
            Arc::clone(&metadata),
            RetryPolicy {
                max_attempts: 2,
                attempt_timeout: Duration::from_secs(1),
            },
        );

        // Does not unwind into the caller
        let outcome = coordinator.ingest(&payload("edge-1")).await;

        match outcome {
            IngestOutcome::PartiallyPersisted(failures) => {
                assert!(matches!(failures.timeseries, Some(SinkError::Unavailable(_))));
                assert!(failures.metadata.is_none());
            }
            other => panic!("expected PartiallyPersisted, got {:?}", other),
        }

        assert!(metadata.get("edge-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dropped_field_still_accepted() {
        let (coordinator, timeseries, metadata) = coordinator_with_policy(RetryPolicy::default());

        let mixed = serde_json::to_vec(&json!({
            "device_id": "edge-1",
            "timestamp": "2024-01-01T00:00:00Z",
            "sensors": {"temperature": 21.5, "humidity": "bad"}
        }))
        .unwrap();

        let outcome = coordinator.ingest(&mixed).await;
        assert_eq!(outcome, IngestOutcome::Accepted);

        // Only the coercible field survives
        let points = timeseries.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].metric, "temperature");
        assert_eq!(points[0].value, 21.5);

        let record = metadata.get("edge-1").unwrap().unwrap();
        assert!(!record.last_payload.sensors.contains_key("humidity"));
    }

    #[tokio::test]
    async fn test_empty_sections_write_empty_batch() {
        let (coordinator, timeseries, metadata) = coordinator_with_policy(RetryPolicy::default());

        let empty = serde_json::to_vec(&json!({
            "device_id": "edge-1",
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let outcome = coordinator.ingest(&empty).await;
        assert_eq!(outcome, IngestOutcome::Accepted);

        // Accepted messages map 1:1 to batch calls, even empty ones
        assert_eq!(timeseries.batch_sizes(), vec![0]);
        assert_eq!(metadata.upsert_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ingest_tolerated() {
        let (coordinator, timeseries, metadata) = coordinator_with_policy(RetryPolicy::default());
        let bytes = payload("edge-1");

        assert_eq!(coordinator.ingest(&bytes).await, IngestOutcome::Accepted);
        assert_eq!(coordinator.ingest(&bytes).await, IngestOutcome::Accepted);

        // Timeseries appends the duplicate; metadata stays one record
        assert_eq!(timeseries.count().unwrap(), 6);
        assert_eq!(metadata.count().unwrap(), 1);
        assert_eq!(metadata.upsert_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest_distinct_devices() {
        let (coordinator, _timeseries, metadata) = coordinator_with_policy(RetryPolicy::default());
        let coordinator = Arc::new(coordinator);

        let mut handles = Vec::new();
        for i in 0..100 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator.ingest(&payload(&format!("edge-{}", i))).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), IngestOutcome::Accepted);
        }

        assert_eq!(metadata.count().unwrap(), 100);
        assert_eq!(coordinator.stats().messages_accepted, 100);
    }
}
