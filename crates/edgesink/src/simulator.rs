// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synthetic device traffic
//!
//! Generates readings shaped like real edge device payloads and publishes
//! them over the loopback transport. Used by the service binary's
//! `--simulate` mode and by integration tests.

use crate::transport::{ChannelTransport, TransportError};
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// One simulated edge device
pub struct DeviceSimulator {
    device_id: String,
}

impl DeviceSimulator {
    /// Create a simulator with a random device identity
    pub fn new() -> Self {
        Self {
            device_id: format!("edge_device_{:08x}", fastrand::u32(..)),
        }
    }

    /// Create a simulator with a fixed device identity
    pub fn with_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    /// Device identity used in generated payloads
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Generate one reading payload
    ///
    /// Field ranges mirror real device firmware. The timestamp is naive
    /// ISO-8601 (no zone suffix), which is what the devices actually send.
    pub fn generate(&self) -> Vec<u8> {
        let timestamp = chrono::Utc::now()
            .naive_utc()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();

        json!({
            "device_id": self.device_id,
            "timestamp": timestamp,
            "sensors": {
                "temperature": round2(18.0 + fastrand::f64() * 10.0),
                "humidity": round2(30.0 + fastrand::f64() * 40.0),
                "pressure": round2(980.0 + fastrand::f64() * 40.0),
                "vibration": round2(fastrand::f64() * 5.0),
            },
            "status": {
                "battery": round2(60.0 + fastrand::f64() * 40.0),
                "signal_strength": round2(-80.0 + fastrand::f64() * 40.0),
                "uptime": fastrand::u64(1000..100_000),
            }
        })
        .to_string()
        .into_bytes()
    }
}

impl Default for DeviceSimulator {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Publish simulated readings until cancelled
///
/// Spawns no tasks of its own; run it under `tokio::spawn` and abort the
/// handle to stop. Publishing before the service has connected the
/// transport is not an error; those ticks are skipped.
pub async fn run_simulators(
    transport: Arc<ChannelTransport>,
    topic: String,
    count: usize,
    interval: Duration,
) -> Result<()> {
    let simulators: Vec<DeviceSimulator> =
        (0..count.max(1)).map(|_| DeviceSimulator::new()).collect();

    tracing::info!(
        "Simulating {} devices on '{}' every {:?}",
        simulators.len(),
        topic,
        interval
    );

    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));

    loop {
        ticker.tick().await;

        for simulator in &simulators {
            match transport.publish(&topic, simulator.generate()).await {
                Ok(()) => {}
                Err(TransportError::NotConnected) => break,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
