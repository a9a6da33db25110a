//! Destinations that accept appended row batches

pub mod json_lines;
pub mod table;

use async_trait::async_trait;

use crate::error::EtlResult;
use crate::formats::RowBatch;

pub use json_lines::JsonLinesSink;
pub use table::TableSink;

/// Append-only destination for the batches of a dataset.
///
/// Each dataset writes to its own location (directory or table), so
/// concurrent jobs for different datasets never contend on a destination.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable destination, for logs
    fn describe(&self) -> String;

    /// Make the destination of `dataset` ready to receive batches.
    ///
    /// Called once per dataset, after its input files were located.
    async fn prepare(&self, dataset: &str, columns: &[String]) -> EtlResult<()>;

    /// Append one batch. Never overwrites or replaces existing data.
    async fn append_batch(&self, dataset: &str, batch: &RowBatch) -> EtlResult<()>;
}
