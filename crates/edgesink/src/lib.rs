// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Edge Telemetry Ingestion Service
//!
//! Subscribes to device readings on a pub/sub transport and persists them
//! into a queryable timeseries sink and a latest-state metadata store.
//!
//! # Features
//!
//! - **Tolerant decoding** -- readings arrive as loosely-shaped device JSON;
//!   only structural problems reject a message
//! - **Dual sinks** -- append-only timeseries history plus one latest-state
//!   record per device, dispatched independently
//! - **Bounded retry** -- per-attempt timeout and retry budget for every
//!   sink call; failures surface as outcomes, never panics
//! - **Backpressure** -- at most `max_in_flight` messages in the sink path;
//!   further deliveries wait instead of being dropped
//!
//! # Architecture
//!
//! ```text
//! IngestService
//! +-- SubscriptionManager  (transport session, bounded dispatch)
//! +-- IngestCoordinator    (decode, fan out, retry, fold outcomes)
//!     +-- TimeseriesSink   (SQLite or in-memory backend)
//!     +-- MetadataStore    (SQLite or in-memory backend)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use edgesink::{ChannelTransport, Config, IngestService};
//! use edgesink::{SqliteMetadataStore, SqliteTimeseriesSink};
//! use std::sync::Arc;
//!
//! let config = Config::builder()
//!     .topic_filters(vec!["sensors/#".to_string()])
//!     .max_in_flight(64)
//!     .build();
//!
//! let timeseries = Arc::new(SqliteTimeseriesSink::new("edgesink.db")?);
//! let metadata = Arc::new(SqliteMetadataStore::new("edgesink.db")?);
//! let transport = Arc::new(ChannelTransport::new(1024));
//!
//! let service = IngestService::new(config, timeseries, metadata, transport);
//! service.run().await?;
//! ```

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod reading;
pub mod simulator;
pub mod sink;
pub mod sqlite;
pub mod stats;
pub mod subscription;
pub mod transport;

pub use codec::{decode, DecodeError};
pub use config::Config;
pub use coordinator::{IngestCoordinator, IngestOutcome, RetryPolicy, SinkFailures};
pub use reading::{DeviceMetadataRecord, DeviceReading, Series, TimeseriesPoint};
pub use simulator::DeviceSimulator;
pub use sink::{
    MemoryMetadataStore, MemoryTimeseriesSink, MetadataStore, SinkError, TimeseriesSink,
};
pub use sqlite::{SqliteMetadataStore, SqliteTimeseriesSink};
pub use stats::{IngestStats, IngestStatsSnapshot};
pub use subscription::SubscriptionManager;
pub use transport::{ChannelTransport, InboundMessage, Transport, TransportError};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Ingestion Service
///
/// Wires the subscription manager and coordinator over injected sinks and
/// transport, and periodically logs ingestion statistics.
///
/// # Type Parameters
///
/// - `T` -- Timeseries sink backend (e.g., `SqliteTimeseriesSink`)
/// - `M` -- Metadata store backend (e.g., `SqliteMetadataStore`)
pub struct IngestService<T: TimeseriesSink, M: MetadataStore> {
    config: Config,
    coordinator: Arc<IngestCoordinator<T, M>>,
    transport: Arc<dyn Transport>,
}

impl<T: TimeseriesSink + 'static, M: MetadataStore + 'static> IngestService<T, M> {
    /// Create a new ingestion service
    pub fn new(
        config: Config,
        timeseries: Arc<T>,
        metadata: Arc<M>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let coordinator = Arc::new(IngestCoordinator::new(
            timeseries,
            metadata,
            config.retry_policy(),
        ));

        Self {
            config,
            coordinator,
            transport,
        }
    }

    /// Shared coordinator handle (for direct ingestion or stats access)
    pub fn coordinator(&self) -> Arc<IngestCoordinator<T, M>> {
        Arc::clone(&self.coordinator)
    }

    /// Snapshot of current ingestion statistics
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.coordinator.stats()
    }

    /// Run the ingestion service until the transport channel ends
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting edge telemetry ingestion service");
        tracing::info!("  Topics: {:?}", self.config.topic_filters);
        tracing::info!("  In-flight limit: {}", self.config.max_in_flight);

        let stats_task = if self.config.stats_interval_secs > 0 {
            let coordinator = Arc::clone(&self.coordinator);
            let period = Duration::from_secs(self.config.stats_interval_secs);
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await; // first tick completes immediately
                loop {
                    ticker.tick().await;
                    let stats = coordinator.stats();
                    tracing::info!(
                        "Ingest stats: received={}, accepted={}, rejected={}, partial={}, retries={}, rate={:.1}/s",
                        stats.messages_received,
                        stats.messages_accepted,
                        stats.messages_rejected,
                        stats.partial_failures(),
                        stats.sink_retries,
                        stats.messages_per_second()
                    );
                }
            }))
        } else {
            None
        };

        let manager = SubscriptionManager::new(
            self.config.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.coordinator),
        );
        let result = manager.run().await;

        if let Some(task) = stats_task {
            task.abort();
        }

        result
    }
}
