// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription manager
//!
//! Owns the transport session and feeds delivered messages to the
//! coordinator without letting sink latency stall the delivery stream.
//!
//! # Operation
//!
//! 1. Connect and subscribe with the configured topic filters
//! 2. Receive messages from the transport channel
//! 3. Ingest each message on its own task, bounded by `max_in_flight`
//!    permits (further deliveries wait; nothing is dropped)
//! 4. When the channel ends, drain in-flight ingests and disconnect

use crate::config::Config;
use crate::coordinator::IngestCoordinator;
use crate::sink::{MetadataStore, TimeseriesSink};
use crate::transport::Transport;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Subscription manager
///
/// Decouples sink persistence from transport delivery: a slow or retrying
/// sink only occupies one of the `max_in_flight` permits while the receive
/// loop keeps accepting messages.
pub struct SubscriptionManager<T: TimeseriesSink, M: MetadataStore> {
    config: Config,
    transport: Arc<dyn Transport>,
    coordinator: Arc<IngestCoordinator<T, M>>,
}

impl<T: TimeseriesSink + 'static, M: MetadataStore + 'static> SubscriptionManager<T, M> {
    /// Create a new subscription manager
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        coordinator: Arc<IngestCoordinator<T, M>>,
    ) -> Self {
        Self {
            config,
            transport,
            coordinator,
        }
    }

    /// Run the subscription manager until the transport channel ends
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            "SubscriptionManager started: client_id={}, topics={:?}",
            self.config.client_id,
            self.config.topic_filters
        );

        self.transport.connect()?;
        let mut rx = self.transport.subscribe(&self.config.topic_filters)?;

        let in_flight_limit = self.config.max_in_flight.max(1);
        let semaphore = Arc::new(Semaphore::new(in_flight_limit));

        while let Some(message) = rx.recv().await {
            let permit = Arc::clone(&semaphore).acquire_owned().await?;
            let coordinator = Arc::clone(&self.coordinator);

            tokio::spawn(async move {
                let outcome = coordinator.ingest(&message.payload).await;
                if !outcome.is_accepted() {
                    tracing::debug!(
                        "Message on {} not fully persisted: {:?}",
                        message.topic,
                        outcome
                    );
                }
                drop(permit);
            });
        }

        // Channel ended; wait for in-flight ingests before disconnecting
        let _drain = Arc::clone(&semaphore)
            .acquire_many_owned(in_flight_limit as u32)
            .await?;
        self.transport.disconnect()?;

        tracing::info!("SubscriptionManager stopped");
        Ok(())
    }
}
