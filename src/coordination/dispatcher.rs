use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id as TaskId, JoinSet};
use tracing::{info, warn};

use super::job::{DatasetJob, JobOptions, JobResult};
use crate::config::MAX_WORKERS;
use crate::error::{EtlError, EtlResult};
use crate::formats::SchemaDocument;
use crate::sink::Sink;
use crate::telemetry::TelemetrySender;

/// Runs one [`DatasetJob`] per dataset on a bounded pool of tokio tasks.
///
/// Jobs are independent: a failing or panicking dataset never cancels its
/// siblings, and every requested dataset gets exactly one result.
pub struct Dispatcher {
    source_root: PathBuf,
    sink: Arc<dyn Sink>,
    options: JobOptions,
    max_workers: usize,
    telemetry_tx: Option<TelemetrySender>,
}

impl Dispatcher {
    pub fn new(source_root: impl AsRef<Path>, sink: Arc<dyn Sink>, options: JobOptions) -> Self {
        Self {
            source_root: source_root.as_ref().to_path_buf(),
            sink,
            options,
            max_workers: MAX_WORKERS,
            telemetry_tx: None,
        }
    }

    /// Cap on concurrently running jobs, kept within `1..=MAX_WORKERS`
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = worker_cap(max_workers);
        self
    }

    pub fn with_telemetry(mut self, telemetry_tx: TelemetrySender) -> Self {
        self.telemetry_tx = Some(telemetry_tx);
        self
    }

    /// Number of tasks that run at once for `requested` datasets
    pub fn pool_size(&self, requested: usize) -> usize {
        requested.min(self.max_workers).max(1)
    }

    /// Load the schema document once, then run every dataset in `datasets`
    /// (or every dataset the schema defines when `None`).
    ///
    /// The only error is a schema document that cannot be loaded; per-dataset
    /// failures are reported in the returned map.
    pub async fn run_all(
        &self,
        datasets: Option<Vec<String>>,
    ) -> EtlResult<BTreeMap<String, JobResult>> {
        let schema = Arc::new(SchemaDocument::load(&self.source_root).await?);
        info!(
            "Loaded schema document {} with {} datasets",
            schema.path().display(),
            schema.dataset_names().len()
        );

        let datasets = resolve_datasets(&schema, datasets);
        for unknown in datasets.iter().filter(|d| !schema.contains(d)) {
            warn!("Dataset {} is not defined in the schema document", unknown);
        }
        Ok(self.dispatch(schema, datasets).await)
    }

    async fn dispatch(
        &self,
        schema: Arc<SchemaDocument>,
        datasets: Vec<String>,
    ) -> BTreeMap<String, JobResult> {
        let mut results = BTreeMap::new();
        if datasets.is_empty() {
            info!("No datasets to process");
            return results;
        }

        let pool_size = self.pool_size(datasets.len());
        info!(
            "Processing {} datasets with {} workers into {}",
            datasets.len(),
            pool_size,
            self.sink.describe()
        );

        let permits = Arc::new(Semaphore::new(pool_size));
        let mut tasks = JoinSet::new();
        // NOTE: tokio task ids are not `Ord`, hence the HashMap
        let mut task_datasets: HashMap<TaskId, String> = HashMap::new();

        for dataset in datasets {
            let mut job = DatasetJob::new(
                Arc::clone(&schema),
                &self.source_root,
                Arc::clone(&self.sink),
                self.options.clone(),
            );
            if let Some(tx) = &self.telemetry_tx {
                job = job.with_telemetry(tx.clone());
            }
            let permits = Arc::clone(&permits);
            let name = dataset.clone();

            let handle = tasks.spawn(async move {
                // The semaphore is never closed, so acquiring cannot fail
                let _permit = permits.acquire_owned().await;
                job.run(&name).await
            });
            task_datasets.insert(handle.id(), dataset);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((task_id, result)) => (task_id, Ok(result)),
                Err(e) => (e.id(), Err(e)),
            };
            let Some(dataset) = task_datasets.remove(&task_id) else {
                warn!("Finished task {} is not tracked by the dispatcher", task_id);
                continue;
            };

            let result = outcome.unwrap_or_else(|e| {
                warn!("Job for dataset {} panicked: {}", dataset, e);
                JobResult::Failed(EtlError::JobPanicked {
                    dataset: dataset.clone(),
                    reason: e.to_string(),
                })
            });
            results.insert(dataset, result);
        }

        let failed = results.values().filter(|r| !r.is_success()).count();
        info!(
            "Finished {} datasets, {} not completed",
            results.len(),
            failed
        );

        results
    }
}

/// The effective worker cap for a requested `max_workers`.
///
/// The table sink sizes its connection pool with the same value, so every
/// running job can hold a connection.
pub fn worker_cap(max_workers: usize) -> usize {
    max_workers.clamp(1, MAX_WORKERS)
}

/// Requested names, deduplicated in first-seen order, or every dataset of the schema
fn resolve_datasets(schema: &SchemaDocument, requested: Option<Vec<String>>) -> Vec<String> {
    match requested {
        Some(names) => {
            let mut seen = BTreeSet::new();
            names
                .into_iter()
                .filter(|name| seen.insert(name.clone()))
                .collect()
        }
        None => schema.dataset_names(),
    }
}
