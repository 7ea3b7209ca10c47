// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion service configuration

use crate::coordinator::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ingestion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Topic filters to subscribe to (support wildcards: "sensors/#", "sensors/+/data")
    pub topic_filters: Vec<String>,

    /// Client identity announced to the broker
    pub client_id: String,

    /// Maximum messages processed concurrently; further deliveries wait
    pub max_in_flight: usize,

    /// Total attempts per sink call (minimum 1)
    pub retry_max_attempts: u32,

    /// Per-attempt sink timeout in milliseconds
    pub sink_timeout_ms: u64,

    /// Interval between stats log lines in seconds (0 = disabled)
    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic_filters: vec!["sensors/#".to_string()],
            client_id: "edgesink".to_string(),
            max_in_flight: 64,
            retry_max_attempts: 3,
            sink_timeout_ms: 5000,
            stats_interval_secs: 30,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Retry policy derived from the sink retry fields
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            attempt_timeout: Duration::from_millis(self.sink_timeout_ms),
        }
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    topic_filters: Option<Vec<String>>,
    client_id: Option<String>,
    max_in_flight: Option<usize>,
    retry_max_attempts: Option<u32>,
    sink_timeout_ms: Option<u64>,
    stats_interval_secs: Option<u64>,
}

impl ConfigBuilder {
    /// Set topic filters (support wildcards: "sensors/#", "sensors/+/data")
    pub fn topic_filters(mut self, filters: Vec<String>) -> Self {
        self.topic_filters = Some(filters);
        self
    }

    /// Set client identity
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set maximum concurrently processed messages
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    /// Set total attempts per sink call
    pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    /// Set per-attempt sink timeout in milliseconds
    pub fn sink_timeout_ms(mut self, ms: u64) -> Self {
        self.sink_timeout_ms = Some(ms);
        self
    }

    /// Set stats logging interval in seconds (0 = disabled)
    pub fn stats_interval_secs(mut self, secs: u64) -> Self {
        self.stats_interval_secs = Some(secs);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let defaults = Config::default();

        Config {
            topic_filters: self.topic_filters.unwrap_or(defaults.topic_filters),
            client_id: self.client_id.unwrap_or(defaults.client_id),
            max_in_flight: self.max_in_flight.unwrap_or(defaults.max_in_flight),
            retry_max_attempts: self
                .retry_max_attempts
                .unwrap_or(defaults.retry_max_attempts),
            sink_timeout_ms: self.sink_timeout_ms.unwrap_or(defaults.sink_timeout_ms),
            stats_interval_secs: self
                .stats_interval_secs
                .unwrap_or(defaults.stats_interval_secs),
        }
    }
}
