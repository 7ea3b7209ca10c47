// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry data model
//!
//! Defines the decoded reading and the two derived views the sinks persist:
//! append-only timeseries points and the per-device latest-state record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A decoded telemetry message from one edge device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    /// Device identifier (never empty)
    pub device_id: String,

    /// Device-supplied timestamp (nanosecond resolution, may be skewed)
    pub timestamp: DateTime<Utc>,

    /// Sensor readings: metric name -> numeric value
    pub sensors: HashMap<String, f64>,

    /// Status indicators: metric name -> numeric value
    pub status: HashMap<String, f64>,
}

impl DeviceReading {
    /// Derive one timeseries point per sensor and status entry.
    ///
    /// Sensor entries come first; within a section the order is unspecified.
    pub fn to_points(&self) -> Vec<TimeseriesPoint> {
        let mut points = Vec::with_capacity(self.sensors.len() + self.status.len());

        for (metric, value) in &self.sensors {
            points.push(TimeseriesPoint {
                device_id: self.device_id.clone(),
                series: Series::SensorData,
                metric: metric.clone(),
                value: *value,
                timestamp: self.timestamp,
            });
        }

        for (metric, value) in &self.status {
            points.push(TimeseriesPoint {
                device_id: self.device_id.clone(),
                series: Series::DeviceStatus,
                metric: metric.clone(),
                value: *value,
                timestamp: self.timestamp,
            });
        }

        points
    }
}

/// Measurement family for a timeseries point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Series {
    /// Sensor readings (`sensor_data`)
    SensorData,
    /// Device status indicators (`device_status`)
    DeviceStatus,
}

impl Series {
    /// Canonical series name as stored in the sinks
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SensorData => "sensor_data",
            Self::DeviceStatus => "device_status",
        }
    }

    /// Parse a stored series name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sensor_data" => Some(Self::SensorData),
            "device_status" => Some(Self::DeviceStatus),
            _ => None,
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appended timeseries value, keyed by (device, series, metric, time)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeseriesPoint {
    /// Device identifier
    pub device_id: String,

    /// Measurement family
    pub series: Series,

    /// Metric name within the series
    pub metric: String,

    /// Numeric value
    pub value: f64,

    /// Reading timestamp (from the device)
    pub timestamp: DateTime<Utc>,
}

impl TimeseriesPoint {
    /// Timestamp as Unix nanoseconds for storage
    pub fn timestamp_ns(&self) -> i64 {
        epoch_ns(self.timestamp)
    }
}

/// Latest-state record for one device, overwritten on every message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMetadataRecord {
    /// Device identifier
    pub device_id: String,

    /// When the service last ingested a message from this device
    /// (ingestion clock, not the device timestamp)
    pub last_seen: DateTime<Utc>,

    /// Full decoded payload of the most recent message
    pub last_payload: DeviceReading,

    /// Status map copied from the most recent message
    pub status: HashMap<String, f64>,

    /// Record update time
    pub updated_at: DateTime<Utc>,
}

impl DeviceMetadataRecord {
    /// Build the latest-state record for a reading ingested at `ingested_at`.
    pub fn from_reading(reading: &DeviceReading, ingested_at: DateTime<Utc>) -> Self {
        Self {
            device_id: reading.device_id.clone(),
            last_seen: ingested_at,
            last_payload: reading.clone(),
            status: reading.status.clone(),
            updated_at: ingested_at,
        }
    }
}

/// Convert to Unix nanoseconds. Values outside the representable
/// range saturate; the codec rejects such timestamps before they
/// reach a sink.
pub(crate) fn epoch_ns(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}
