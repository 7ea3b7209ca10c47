// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Edge Telemetry Ingestion CLI
//!
//! Subscribes to device readings and persists them into SQLite-backed
//! timeseries and metadata sinks.
//!
//! # Usage
//!
//! ```bash
//! # Run with a loopback simulation of 5 devices
//! edgesink --db edgesink.db --simulate 5
//!
//! # Filter specific topics
//! edgesink --topics "sensors/+/data" --max-in-flight 128
//!
//! # Inspect stored data
//! edgesink stats
//! edgesink devices
//! edgesink history edge_device_0000002a
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use edgesink::simulator::run_simulators;
use edgesink::{
    ChannelTransport, Config, IngestService, MetadataStore, SqliteMetadataStore,
    SqliteTimeseriesSink, TimeseriesSink, Transport,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "edgesink")]
#[command(about = "Edge telemetry ingestion - pub/sub readings into timeseries and metadata sinks", long_about = None)]
struct Args {
    /// Database path (SQLite file, shared by both sinks)
    #[arg(short, long, default_value = "edgesink.db")]
    db: String,

    /// Use in-memory sinks instead of the database file (data is lost on exit)
    #[arg(long)]
    memory: bool,

    /// Topic filters, comma-separated (support wildcards: "sensors/#", "sensors/+/data")
    #[arg(short, long, default_value = "sensors/#")]
    topics: String,

    /// Client identity announced to the broker
    #[arg(long, default_value = "edgesink")]
    client_id: String,

    /// Total attempts per sink call
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Per-attempt sink timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    sink_timeout_ms: u64,

    /// Maximum messages processed concurrently
    #[arg(long, default_value_t = 64)]
    max_in_flight: usize,

    /// Stats logging interval in seconds (0 = disabled)
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,

    /// Number of simulated devices to publish locally (0 = none)
    #[arg(long, default_value_t = 0)]
    simulate: usize,

    /// Interval between simulated readings in milliseconds
    #[arg(long, default_value_t = 1000)]
    publish_interval_ms: u64,

    /// Topic simulated readings are published on
    #[arg(long, default_value = "sensors/data")]
    publish_topic: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show stored data statistics
    Stats,
    /// List known devices with their latest state
    Devices,
    /// Show stored points for a device
    History {
        /// Device to show
        device_id: String,
    },
    /// Clear all stored points and device metadata
    Clear {
        /// Confirm deletion
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    // Both sinks share the database file
    let (timeseries, metadata) = if args.memory {
        (
            SqliteTimeseriesSink::new_in_memory()?,
            SqliteMetadataStore::new_in_memory()?,
        )
    } else {
        (
            SqliteTimeseriesSink::new(&args.db)?,
            SqliteMetadataStore::new(&args.db)?,
        )
    };

    // Handle subcommands
    if let Some(cmd) = args.command {
        return handle_command(cmd, &timeseries, &metadata);
    }

    tracing::info!("Edge telemetry ingestion starting...");
    if args.memory {
        tracing::info!("  Database: in-memory");
    } else {
        tracing::info!("  Database: {}", args.db);
    }
    tracing::info!("  Topics: {}", args.topics);
    tracing::info!("  Retries: {} per sink call", args.retries);
    tracing::info!("  In-flight limit: {}", args.max_in_flight);

    let topic_filters: Vec<String> = args
        .topics
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let config = Config::builder()
        .topic_filters(topic_filters)
        .client_id(&args.client_id)
        .max_in_flight(args.max_in_flight)
        .retry_max_attempts(args.retries)
        .sink_timeout_ms(args.sink_timeout_ms)
        .stats_interval_secs(args.stats_interval)
        .build();

    let transport = Arc::new(ChannelTransport::new(1024));

    if args.simulate > 0 {
        tracing::info!(
            "Simulation: {} devices publishing to '{}' every {}ms",
            args.simulate,
            args.publish_topic,
            args.publish_interval_ms
        );

        let sim_transport = Arc::clone(&transport);
        let topic = args.publish_topic.clone();
        let count = args.simulate;
        let interval = Duration::from_millis(args.publish_interval_ms);
        tokio::spawn(async move {
            if let Err(e) = run_simulators(sim_transport, topic, count, interval).await {
                tracing::error!("Simulator stopped: {}", e);
            }
        });
    }

    let service = IngestService::new(
        config,
        Arc::new(timeseries),
        Arc::new(metadata),
        transport as Arc<dyn Transport>,
    );

    tokio::select! {
        result = service.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    }
}

fn handle_command(
    cmd: Commands,
    timeseries: &SqliteTimeseriesSink,
    metadata: &SqliteMetadataStore,
) -> Result<()> {
    match cmd {
        Commands::Stats => {
            println!("Stored points: {}", timeseries.count()?);
            println!("Known devices: {}", metadata.count()?);
        }
        Commands::Devices => {
            let records = metadata.devices()?;
            println!("Known devices ({}):", records.len());
            for record in &records {
                println!(
                    "  {} last_seen={} status={}",
                    record.device_id,
                    record.last_seen.to_rfc3339(),
                    serde_json::to_string(&record.status)?
                );
            }
        }
        Commands::History { device_id } => {
            let points = timeseries.query_range(&device_id, i64::MIN, i64::MAX)?;
            println!("{} points for device '{}':", points.len(), device_id);
            for point in &points {
                println!(
                    "  {}/{} = {} at {}",
                    point.series,
                    point.metric,
                    point.value,
                    point.timestamp.to_rfc3339()
                );
            }
        }
        Commands::Clear { confirm } => {
            if confirm {
                timeseries.clear()?;
                metadata.clear()?;
                println!("Stored points and device metadata cleared.");
            } else {
                println!("Use --confirm to actually delete stored data.");
            }
        }
    }

    Ok(())
}
