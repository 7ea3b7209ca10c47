// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite sink backends
//!
//! Durable reference implementations of both sink capabilities with zero
//! external services.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE points (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     device_id TEXT NOT NULL,
//!     series TEXT NOT NULL,
//!     metric TEXT NOT NULL,
//!     value REAL NOT NULL,
//!     timestamp_ns INTEGER NOT NULL
//! );
//! CREATE INDEX idx_points_device ON points(device_id);
//! CREATE INDEX idx_points_timestamp ON points(timestamp_ns);
//!
//! CREATE TABLE device_metadata (
//!     device_id TEXT PRIMARY KEY,
//!     last_seen_ns INTEGER NOT NULL,
//!     last_payload TEXT NOT NULL,
//!     status TEXT NOT NULL,
//!     updated_at_ns INTEGER NOT NULL
//! );
//! ```

use crate::reading::{epoch_ns, DeviceMetadataRecord, DeviceReading, Series, TimeseriesPoint};
use crate::sink::{MetadataStore, SinkError, TimeseriesSink};
use anyhow::{Context, Result};
use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Both sinks may share one database file; waiting beats failing fast on
/// writer contention.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn open_file(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open SQLite database at {}", path))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn open_memory() -> Result<Connection> {
    let conn =
        Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn store_err(e: rusqlite::Error) -> SinkError {
    SinkError::Rejected(e.to_string())
}

/// SQLite timeseries sink
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
/// Each batch write runs in one transaction: all points land or none do.
pub struct SqliteTimeseriesSink {
    conn: Mutex<Connection>,
}

impl SqliteTimeseriesSink {
    /// Create a new sink backed by a database file
    pub fn new(path: &str) -> Result<Self> {
        let sink = Self {
            conn: Mutex::new(open_file(path)?),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    /// Create an in-memory sink (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let sink = Self {
            conn: Mutex::new(open_memory()?),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                series TEXT NOT NULL,
                metric TEXT NOT NULL,
                value REAL NOT NULL,
                timestamp_ns INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_points_device ON points(device_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_points_timestamp ON points(timestamp_ns)",
            [],
        )?;

        Ok(())
    }

    /// Helper function to map a row to a TimeseriesPoint
    fn row_to_point(row: &rusqlite::Row) -> rusqlite::Result<TimeseriesPoint> {
        let series_name: String = row.get(1)?;
        let series = match Series::parse(&series_name) {
            Some(series) => series,
            None => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    format!("unknown series: {}", series_name).into(),
                ))
            }
        };

        Ok(TimeseriesPoint {
            device_id: row.get(0)?,
            series,
            metric: row.get(2)?,
            value: row.get(3)?,
            timestamp: DateTime::from_timestamp_nanos(row.get::<_, i64>(4)?),
        })
    }
}

impl TimeseriesSink for SqliteTimeseriesSink {
    fn write(&self, points: &[TimeseriesPoint]) -> Result<(), SinkError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO points (device_id, series, metric, value, timestamp_ns)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(store_err)?;

            for point in points {
                stmt.execute(params![
                    point.device_id,
                    point.series.as_str(),
                    point.metric,
                    point.value,
                    point.timestamp_ns(),
                ])
                .map_err(store_err)?;
            }
        }

        tx.commit().map_err(store_err)?;
        Ok(())
    }

    fn query_range(
        &self,
        device_id: &str,
        start_ns: i64,
        end_ns: i64,
    ) -> Result<Vec<TimeseriesPoint>, SinkError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT device_id, series, metric, value, timestamp_ns
                 FROM points
                 WHERE device_id = ?1 AND timestamp_ns BETWEEN ?2 AND ?3
                 ORDER BY timestamp_ns ASC",
            )
            .map_err(store_err)?;

        let points = stmt
            .query_map(params![device_id, start_ns, end_ns], Self::row_to_point)
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;

        Ok(points)
    }

    fn count(&self) -> Result<usize, SinkError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM points", [], |row| row.get(0))
            .map_err(store_err)?;

        Ok(count as usize)
    }

    fn clear(&self) -> Result<(), SinkError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM points", []).map_err(store_err)?;
        Ok(())
    }
}

/// SQLite metadata store
///
/// One row per device, overwritten in place via `ON CONFLICT .. DO UPDATE`.
/// The full payload and the status map are stored as JSON text.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Create a new store backed by a database file
    pub fn new(path: &str) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(open_file(path)?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(open_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS device_metadata (
                device_id TEXT PRIMARY KEY,
                last_seen_ns INTEGER NOT NULL,
                last_payload TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at_ns INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Helper function to map a row to a DeviceMetadataRecord
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<DeviceMetadataRecord> {
        let payload_json: String = row.get(2)?;
        let last_payload: DeviceReading = serde_json::from_str(&payload_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let status_json: String = row.get(3)?;
        let status: HashMap<String, f64> = serde_json::from_str(&status_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(DeviceMetadataRecord {
            device_id: row.get(0)?,
            last_seen: DateTime::from_timestamp_nanos(row.get::<_, i64>(1)?),
            last_payload,
            status,
            updated_at: DateTime::from_timestamp_nanos(row.get::<_, i64>(4)?),
        })
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn upsert(&self, record: &DeviceMetadataRecord) -> Result<(), SinkError> {
        let payload_json = serde_json::to_string(&record.last_payload)
            .map_err(|e| SinkError::Rejected(e.to_string()))?;
        let status_json = serde_json::to_string(&record.status)
            .map_err(|e| SinkError::Rejected(e.to_string()))?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO device_metadata (device_id, last_seen_ns, last_payload, status, updated_at_ns)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(device_id) DO UPDATE SET
                 last_seen_ns = excluded.last_seen_ns,
                 last_payload = excluded.last_payload,
                 status = excluded.status,
                 updated_at_ns = excluded.updated_at_ns",
            params![
                record.device_id,
                epoch_ns(record.last_seen),
                payload_json,
                status_json,
                epoch_ns(record.updated_at),
            ],
        )
        .map_err(store_err)?;

        Ok(())
    }

    fn get(&self, device_id: &str) -> Result<Option<DeviceMetadataRecord>, SinkError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT device_id, last_seen_ns, last_payload, status, updated_at_ns
                 FROM device_metadata
                 WHERE device_id = ?1",
                [device_id],
                Self::row_to_record,
            )
            .optional()
            .map_err(store_err)?;

        Ok(record)
    }

    fn devices(&self) -> Result<Vec<DeviceMetadataRecord>, SinkError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT device_id, last_seen_ns, last_payload, status, updated_at_ns
                 FROM device_metadata
                 ORDER BY device_id ASC",
            )
            .map_err(store_err)?;

        let records = stmt
            .query_map([], Self::row_to_record)
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;

        Ok(records)
    }

    fn count(&self) -> Result<usize, SinkError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM device_metadata", [], |row| row.get(0))
            .map_err(store_err)?;

        Ok(count as usize)
    }

    fn clear(&self) -> Result<(), SinkError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM device_metadata", [])
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Series;
    use chrono::Utc;

    fn point(device_id: &str, series: Series, metric: &str, value: f64, ts_ns: i64) -> TimeseriesPoint {
        TimeseriesPoint {
            device_id: device_id.to_string(),
            series,
            metric: metric.to_string(),
            value,
            timestamp: DateTime::from_timestamp_nanos(ts_ns),
        }
    }

    fn reading(device_id: &str) -> DeviceReading {
        let mut sensors = HashMap::new();
        sensors.insert("temperature".to_string(), 22.5);

        let mut status = HashMap::new();
        status.insert("battery".to_string(), 80.0);

        DeviceReading {
            device_id: device_id.to_string(),
            timestamp: DateTime::from_timestamp_nanos(1_704_067_200_000_000_000),
            sensors,
            status,
        }
    }

    #[test]
    fn test_sqlite_sink_write_and_query() {
        let sink = SqliteTimeseriesSink::new_in_memory().unwrap();

        sink.write(&[
            point("d1", Series::SensorData, "temperature", 22.0, 1000),
            point("d1", Series::DeviceStatus, "battery", 80.0, 1000),
        ])
        .unwrap();

        let points = sink.query_range("d1", 0, 10_000).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].device_id, "d1");
        assert_eq!(sink.count().unwrap(), 2);
    }

    #[test]
    fn test_sqlite_sink_range_bounds() {
        let sink = SqliteTimeseriesSink::new_in_memory().unwrap();

        for i in 0..10 {
            sink.write(&[point("d1", Series::SensorData, "t", i as f64, i * 1000)])
                .unwrap();
        }

        let range = sink.query_range("d1", 2000, 5000).unwrap();
        assert_eq!(range.len(), 4); // timestamps 2000, 3000, 4000, 5000
        assert_eq!(range[0].value, 2.0);
        assert_eq!(range[3].value, 5.0);

        assert!(sink.query_range("other", 0, 10_000).unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_sink_series_round_trip() {
        let sink = SqliteTimeseriesSink::new_in_memory().unwrap();

        sink.write(&[point("d1", Series::DeviceStatus, "battery", 75.0, 500)])
            .unwrap();

        let points = sink.query_range("d1", 0, 1000).unwrap();
        assert_eq!(points[0].series, Series::DeviceStatus);
        assert_eq!(points[0].timestamp_ns(), 500);
    }

    #[test]
    fn test_sqlite_sink_duplicates_and_clear() {
        let sink = SqliteTimeseriesSink::new_in_memory().unwrap();
        let p = point("d1", Series::SensorData, "t", 1.0, 100);

        sink.write(&[p.clone()]).unwrap();
        sink.write(&[p]).unwrap();
        assert_eq!(sink.count().unwrap(), 2);

        sink.write(&[]).unwrap(); // empty batch is a no-op, not an error
        assert_eq!(sink.count().unwrap(), 2);

        sink.clear().unwrap();
        assert_eq!(sink.count().unwrap(), 0);
    }

    #[test]
    fn test_sqlite_store_upsert_and_get() {
        let store = SqliteMetadataStore::new_in_memory().unwrap();
        let r = reading("d1");

        store
            .upsert(&DeviceMetadataRecord::from_reading(&r, Utc::now()))
            .unwrap();

        let record = store.get("d1").unwrap().unwrap();
        assert_eq!(record.device_id, "d1");
        assert_eq!(record.status["battery"], 80.0);
        assert_eq!(record.last_payload.sensors["temperature"], 22.5);

        assert!(store.get("unknown").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_store_last_writer_wins() {
        let store = SqliteMetadataStore::new_in_memory().unwrap();

        let mut first = reading("d1");
        first.status.insert("battery".to_string(), 90.0);
        let mut second = reading("d1");
        second.status.insert("battery".to_string(), 45.0);

        store
            .upsert(&DeviceMetadataRecord::from_reading(&first, Utc::now()))
            .unwrap();
        store
            .upsert(&DeviceMetadataRecord::from_reading(&second, Utc::now()))
            .unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let record = store.get("d1").unwrap().unwrap();
        assert_eq!(record.status["battery"], 45.0);
    }

    #[test]
    fn test_sqlite_store_devices_sorted() {
        let store = SqliteMetadataStore::new_in_memory().unwrap();

        for id in ["zeta", "alpha", "mid"] {
            store
                .upsert(&DeviceMetadataRecord::from_reading(&reading(id), Utc::now()))
                .unwrap();
        }

        let devices = store.devices().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].device_id, "alpha");
        assert_eq!(devices[2].device_id, "zeta");
    }

    #[test]
    fn test_sqlite_stores_share_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();

        {
            let sink = SqliteTimeseriesSink::new(path).unwrap();
            let store = SqliteMetadataStore::new(path).unwrap();

            sink.write(&[point("d1", Series::SensorData, "t", 1.0, 100)])
                .unwrap();
            store
                .upsert(&DeviceMetadataRecord::from_reading(&reading("d1"), Utc::now()))
                .unwrap();
        }

        // Reopen: data survives the connections
        let sink = SqliteTimeseriesSink::new(path).unwrap();
        let store = SqliteMetadataStore::new(path).unwrap();
        assert_eq!(sink.count().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }
}
