// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire payload decoding
//!
//! Parses raw pub/sub payloads into [`DeviceReading`]s. Decoding is strict
//! about message identity (`device_id`, `timestamp`) and lenient about the
//! numeric sections: a sensor or status value that cannot be coerced to f64
//! drops only that field, never the whole message.
//!
//! Accepted timestamp forms:
//! - RFC 3339 string with offset (`2024-01-01T00:00:00Z`)
//! - naive ISO-8601 string without offset, interpreted as UTC
//!   (field devices commonly emit these)
//! - integer Unix epoch nanoseconds

use crate::reading::DeviceReading;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Reasons a payload fails decoding
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not a JSON object
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A required field is absent, mistyped, or empty
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),

    /// Timestamp is absent or unparseable
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Decode a raw payload into a [`DeviceReading`].
///
/// Pure with respect to program state; dropped fields are reported via
/// tracing at debug level.
pub fn decode(raw: &[u8]) -> Result<DeviceReading, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let object = match value.as_object() {
        Some(object) => object,
        None => {
            return Err(DecodeError::Malformed(
                "payload is not a JSON object".to_string(),
            ))
        }
    };

    let device_id = match object.get("device_id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(DecodeError::MissingField("device_id")),
    };

    let timestamp = parse_timestamp(object.get("timestamp"))?;

    // Unknown extra top-level fields are ignored.
    let sensors = numeric_section(object, "sensors", &device_id);
    let status = numeric_section(object, "status", &device_id);

    Ok(DeviceReading {
        device_id,
        timestamp,
        sensors,
        status,
    })
}

/// Parse the `timestamp` field. Absence is an invalid timestamp, not a
/// missing field: the reject policy is the same either way.
fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>, DecodeError> {
    let value = match value {
        Some(value) => value,
        None => return Err(DecodeError::InvalidTimestamp("absent".to_string())),
    };

    let parsed = match value {
        Value::String(s) => parse_timestamp_str(s)?,
        Value::Number(n) => {
            // Integer epochs are nanoseconds; float epochs are ambiguous
            // about their unit and are rejected.
            match n.as_i64() {
                Some(ns) => DateTime::from_timestamp_nanos(ns),
                None => return Err(DecodeError::InvalidTimestamp(n.to_string())),
            }
        }
        other => return Err(DecodeError::InvalidTimestamp(other.to_string())),
    };

    // The sinks store nanoseconds; a timestamp outside that range would
    // corrupt on conversion, so it never leaves the codec.
    if parsed.timestamp_nanos_opt().is_none() {
        return Err(DecodeError::InvalidTimestamp(format!(
            "outside nanosecond range: {}",
            parsed
        )));
    }

    Ok(parsed)
}

fn parse_timestamp_str(s: &str) -> Result<DateTime<Utc>, DecodeError> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(s) {
        return Ok(with_offset.with_timezone(&Utc));
    }

    if let Ok(naive) = s.parse::<NaiveDateTime>() {
        return Ok(naive.and_utc());
    }

    Err(DecodeError::InvalidTimestamp(s.to_string()))
}

/// Extract a `sensors`/`status` section as a metric -> f64 map.
///
/// An absent section is an empty map. A section that is present but not a
/// JSON object is dropped whole. Within a section, values that cannot be
/// coerced drop only that field.
fn numeric_section(
    object: &Map<String, Value>,
    section: &str,
    device_id: &str,
) -> HashMap<String, f64> {
    let mut values = HashMap::new();

    let raw = match object.get(section) {
        Some(raw) => raw,
        None => return values,
    };

    let entries = match raw.as_object() {
        Some(entries) => entries,
        None => {
            tracing::debug!(
                "Dropping non-object '{}' section from device {}",
                section,
                device_id
            );
            return values;
        }
    };

    for (metric, value) in entries {
        match coerce_numeric(value) {
            Some(v) => {
                values.insert(metric.clone(), v);
            }
            None => {
                tracing::debug!(
                    "Dropping non-numeric field {}.{}={} from device {}",
                    section,
                    metric,
                    value,
                    device_id
                );
            }
        }
    }

    values
}

/// Coerce a JSON value to f64. Numeric strings are accepted because field
/// devices ship firmware that stringifies readings.
fn coerce_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
