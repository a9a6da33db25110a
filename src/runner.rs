//! High-level runner API for the dataset ETL.
//!
//! This module provides the public interface: it sets up the sink (directory or
//! table), the dispatcher and progress reporting from one [`EtlArgs`] value.
//!
//! This is the primary API for external users and for the CLI.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::config::{DEFAULT_BATCH_SIZE, MAX_WORKERS};
use crate::coordination::{Dispatcher, worker_cap};
use crate::db::{Pool, PoolArgsBuilder};
use crate::db::pool as db_pool;
use crate::telemetry::{TelemetryEvent, spawn_progress};

pub use crate::coordination::{JobOptions, JobResult, JobStats, run_dataset};
pub use crate::error::{ErrorKind, EtlError};
pub use crate::formats::Format;
pub use crate::io::{StoreParams, StoreUrl};
pub use crate::sink::{JsonLinesSink, Sink, TableSink};
pub use crate::telemetry::ProgressStats;

/// Where the datasets are written
#[derive(Debug, Clone)]
pub enum Target {
    /// JSON-lines files under `{dir}/{dataset}/`
    Directory(PathBuf),
    /// One table per dataset in a Postgres database
    Table { url: StoreUrl },
}

/// Arguments for running an ETL pass
#[derive(Debug, Clone)]
pub struct EtlArgs {
    /// Directory holding `schemas.json` and one sub-directory per dataset
    pub source_root: PathBuf,
    pub target: Target,
    /// Datasets to process; `None` processes every dataset in the schema document
    pub datasets: Option<Vec<String>>,
    pub format: Format,

    // Performance tuning
    pub batch_size: usize,
    pub max_workers: usize,
    pub batch_timeout: Option<Duration>,

    // Options
    pub create_table_if_missing: bool,
    pub quiet: bool,

    // Test-only: inject a pre-created pool (for SQLite testing)
    #[cfg(test)]
    pub test_pool: Option<crate::db::Pool>,
}

impl EtlArgs {
    /// Defaults for everything except the source and the target
    pub fn new(source_root: impl Into<PathBuf>, target: Target) -> Self {
        Self {
            source_root: source_root.into(),
            target,
            datasets: None,
            format: Format::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: MAX_WORKERS,
            batch_timeout: None,
            create_table_if_missing: false,
            quiet: true,
            #[cfg(test)]
            test_pool: None,
        }
    }
}

/// Result of an ETL pass
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub results: BTreeMap<String, JobResult>,
    pub progress: ProgressStats,
    pub duration: Duration,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    pub fn rows_written(&self) -> u64 {
        self.results
            .values()
            .map(|r| match r {
                JobResult::Completed(stats) => stats.rows,
                _ => 0,
            })
            .sum()
    }
}

/// Run an ETL pass with the specified arguments
///
/// Failures of individual datasets are reported in [`RunSummary::results`];
/// an error is only returned when the run could not start (invalid arguments,
/// unusable target, or a schema document that cannot be loaded).
///
/// # Example
///
/// ```no_run
/// use dataset_etl::runner::{EtlArgs, Target, run_etl};
///
/// # async fn example() -> anyhow::Result<()> {
/// let mut args = EtlArgs::new("data/retail_db", Target::Directory("data/retail_json".into()));
/// args.datasets = Some(vec!["orders".to_string()]);
///
/// let summary = run_etl(args).await?;
/// for (dataset, result) in &summary.results {
///     println!("{}: {}", dataset, result.label());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn run_etl(args: EtlArgs) -> Result<RunSummary> {
    if args.batch_size == 0 {
        return Err(EtlError::InvalidConfig("batch size must be at least 1".to_string()).into());
    }

    let run_id = Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let start_time = Instant::now();
    info!("Starting run {} from {}", run_id, args.source_root.display());

    let sink = build_sink(&args).await?;

    let options = JobOptions {
        batch_size: args.batch_size,
        delimited: args.format.delimited_config(),
        batch_timeout: args.batch_timeout,
    };

    let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
    // Unknown until the schema is loaded when no datasets were named
    let total = args
        .datasets
        .as_ref()
        .map_or(0, |d| d.iter().collect::<BTreeSet<_>>().len() as u64);
    let progress = spawn_progress(total, telemetry_rx, !args.quiet);

    let dispatcher = Dispatcher::new(&args.source_root, sink, options)
        .with_max_workers(args.max_workers)
        .with_telemetry(telemetry_tx);

    let results = dispatcher.run_all(args.datasets).await;
    // Jobs hold clones of the sender; dropping the dispatcher closes the channel
    drop(dispatcher);
    let progress = progress.await.context("Progress task failed")?;
    let results = results.context("Failed to start dataset jobs")?;

    let duration = start_time.elapsed();
    info!(
        "Run {} finished in {:.2}s",
        run_id,
        duration.as_secs_f64()
    );

    Ok(RunSummary {
        run_id,
        started_at,
        results,
        progress,
        duration,
    })
}

async fn build_sink(args: &EtlArgs) -> Result<Arc<dyn Sink>> {
    match &args.target {
        Target::Directory(dir) => Ok(Arc::new(JsonLinesSink::new(dir))),
        Target::Table { url } => {
            // Create connection pool (or use test pool if provided)
            #[cfg(test)]
            let pool = match args.test_pool.clone() {
                Some(test_pool) => test_pool,
                None => connect(url, args.max_workers).await?,
            };

            #[cfg(not(test))]
            let pool = connect(url, args.max_workers).await?;

            info!("Writing tables to {}", url.redacted());
            Ok(Arc::new(TableSink::new(
                pool,
                url.redacted(),
                args.create_table_if_missing,
            )))
        }
    }
}

async fn connect(url: &StoreUrl, max_workers: usize) -> Result<Pool> {
    let pool_args = PoolArgsBuilder::default()
        .url(url.clone())
        .max_pool_size(worker_cap(max_workers) as u32)
        .build()?;
    db_pool::pool(pool_args).await
}
