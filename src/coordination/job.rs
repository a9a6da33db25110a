use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::{EtlError, EtlResult};
use crate::formats::{ChunkedReader, DelimitedConfig, RowBatch, SchemaDocument};
use crate::io::list_files;
use crate::sink::Sink;
use crate::telemetry::{TelemetryEvent, TelemetrySender};

/// Per-run knobs shared by every dataset job
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub batch_size: usize,
    pub delimited: DelimitedConfig,
    /// Upper bound on a single `append_batch`; `None` waits forever
    pub batch_timeout: Option<Duration>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delimited: DelimitedConfig::default(),
            batch_timeout: None,
        }
    }
}

/// Totals for a dataset that completed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub files: usize,
    pub batches: usize,
    pub rows: u64,
}

/// Outcome of one dataset
#[derive(Debug)]
pub enum JobResult {
    Completed(JobStats),
    /// The dataset directory is missing or holds no `part-*` files
    NotFound,
    Failed(EtlError),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Completed(_))
    }

    /// Short status for reports
    pub fn label(&self) -> String {
        match self {
            JobResult::Completed(_) => "Completed".to_string(),
            JobResult::NotFound => "NotFound".to_string(),
            JobResult::Failed(e) => format!("Failed({})", e.kind()),
        }
    }
}

/// Copies one dataset from the source root into a sink.
///
/// Files are processed one after another in locator order, and batches within
/// a file in read order, so the sink sees the rows of a file in file order.
pub struct DatasetJob {
    schema: Arc<SchemaDocument>,
    source_root: PathBuf,
    sink: Arc<dyn Sink>,
    options: JobOptions,
    telemetry_tx: Option<TelemetrySender>,
}

impl DatasetJob {
    pub fn new(
        schema: Arc<SchemaDocument>,
        source_root: impl AsRef<Path>,
        sink: Arc<dyn Sink>,
        options: JobOptions,
    ) -> Self {
        Self {
            schema,
            source_root: source_root.as_ref().to_path_buf(),
            sink,
            options,
            telemetry_tx: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry_tx: TelemetrySender) -> Self {
        self.telemetry_tx = Some(telemetry_tx);
        self
    }

    fn send_telemetry(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.telemetry_tx {
            let _ = tx.send(event);
        }
    }

    /// Run the job for `dataset`. Never returns an error: every failure is
    /// folded into the result.
    pub async fn run(&self, dataset: &str) -> JobResult {
        self.send_telemetry(TelemetryEvent::DatasetStarted);
        let start = Instant::now();

        let result = match self.copy_dataset(dataset).await {
            Ok(stats) => JobResult::Completed(stats),
            Err(EtlError::NoFilesFound { dir, .. }) => {
                warn!("No part files for dataset {} under {}", dataset, dir.display());
                JobResult::NotFound
            }
            Err(e) => {
                warn!("Dataset {} failed: {}", dataset, e);
                JobResult::Failed(e)
            }
        };

        if let JobResult::Completed(stats) = &result {
            info!(
                "Dataset {} completed: {} files, {} batches, {} rows in {:.2}s",
                dataset,
                stats.files,
                stats.batches,
                stats.rows,
                start.elapsed().as_secs_f64()
            );
        }

        self.send_telemetry(TelemetryEvent::DatasetFinished {
            success: result.is_success(),
        });
        result
    }

    async fn copy_dataset(&self, dataset: &str) -> EtlResult<JobStats> {
        let columns: Arc<[String]> = Arc::from(self.schema.column_names(dataset)?);
        let files = list_files(&self.source_root, dataset).await?;
        debug!("Dataset {} has {} files", dataset, files.len());

        // Nothing is written for a dataset without input files
        self.sink.prepare(dataset, &columns).await?;

        let mut stats = JobStats::default();
        for path in files {
            self.copy_file(dataset, path, Arc::clone(&columns), &mut stats)
                .await?;
            stats.files += 1;
        }

        Ok(stats)
    }

    async fn copy_file(
        &self,
        dataset: &str,
        path: PathBuf,
        columns: Arc<[String]>,
        stats: &mut JobStats,
    ) -> EtlResult<()> {
        let batch_size = self.options.batch_size;
        let config = self.options.delimited.clone();

        let mut reader = self
            .blocking(dataset, move || {
                ChunkedReader::open(&path, columns, batch_size, &config)
            })
            .await??;

        loop {
            let (returned, next) = self
                .blocking(dataset, move || {
                    let next = reader.next();
                    (reader, next)
                })
                .await?;
            reader = returned;

            let Some(batch) = next else {
                break;
            };
            let batch = batch?;

            info!("Populating chunk {} of {}", batch.index, dataset);
            self.append(dataset, &batch).await?;

            stats.batches += 1;
            stats.rows += batch.len() as u64;
        }

        Ok(())
    }

    async fn append(&self, dataset: &str, batch: &RowBatch) -> EtlResult<()> {
        let start = Instant::now();

        match self.options.batch_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, self.sink.append_batch(dataset, batch))
                    .await
                    .map_err(|_| EtlError::SinkWriteFailed {
                        dataset: dataset.to_string(),
                        file: batch.file_name.clone(),
                        batch: batch.index,
                        reason: format!("timed out after {:?}", limit),
                    })??;
            }
            None => self.sink.append_batch(dataset, batch).await?,
        }

        self.send_telemetry(TelemetryEvent::BatchWritten {
            rows: batch.len() as u64,
            duration_ms: start.elapsed().as_millis() as u64,
        });
        Ok(())
    }

    /// Run file reads on the blocking pool so slow disks do not stall other jobs
    async fn blocking<T, F>(&self, dataset: &str, f: F) -> EtlResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| EtlError::JobPanicked {
                dataset: dataset.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Load the schema document under `source_root` and run a single dataset.
///
/// A schema that cannot be loaded is reported as the dataset's failure.
pub async fn run_dataset(
    source_root: &Path,
    sink: Arc<dyn Sink>,
    dataset: &str,
    options: JobOptions,
) -> JobResult {
    match SchemaDocument::load(source_root).await {
        Ok(schema) => {
            DatasetJob::new(Arc::new(schema), source_root, sink, options)
                .run(dataset)
                .await
        }
        Err(e) => JobResult::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sink::JsonLinesSink;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const SCHEMA: &str = r#"{
        "orders": [
            {"column_name": "order_status", "column_position": 4},
            {"column_name": "order_id", "column_position": 1},
            {"column_name": "order_customer_id", "column_position": 3},
            {"column_name": "order_date", "column_position": 2}
        ],
        "customers": [
            {"column_name": "customer_id", "column_position": 1},
            {"column_name": "customer_fname", "column_position": 2}
        ]
    }"#;

    /// Records every call so tests can assert on what reached the sink
    #[derive(Default)]
    struct RecordingSink {
        prepared: Mutex<Vec<String>>,
        batches: Mutex<Vec<(String, String, usize, usize)>>,
        fail_on_batch: Option<usize>,
        delay: Option<Duration>,
        appends: AtomicUsize,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn describe(&self) -> String {
            "recording".to_string()
        }

        async fn prepare(&self, dataset: &str, _columns: &[String]) -> EtlResult<()> {
            self.prepared.lock().unwrap().push(dataset.to_string());
            Ok(())
        }

        async fn append_batch(&self, dataset: &str, batch: &RowBatch) -> EtlResult<()> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_on_batch == Some(batch.index) {
                return Err(EtlError::SinkWriteFailed {
                    dataset: dataset.to_string(),
                    file: batch.file_name.clone(),
                    batch: batch.index,
                    reason: "injected".to_string(),
                });
            }
            self.batches.lock().unwrap().push((
                dataset.to_string(),
                batch.file_name.clone(),
                batch.index,
                batch.len(),
            ));
            Ok(())
        }
    }

    fn source_with(files: &[(&str, &str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("schemas.json"), SCHEMA).unwrap();
        for (dataset, name, content) in files {
            let ds_dir = dir.path().join(dataset);
            std::fs::create_dir_all(&ds_dir).unwrap();
            std::fs::write(ds_dir.join(name), content).unwrap();
        }
        dir
    }

    fn options(batch_size: usize) -> JobOptions {
        JobOptions {
            batch_size,
            ..JobOptions::default()
        }
    }

    async fn job_for(source: &TempDir, sink: Arc<dyn Sink>, opts: JobOptions) -> DatasetJob {
        let schema = SchemaDocument::load(source.path()).await.unwrap();
        DatasetJob::new(Arc::new(schema), source.path(), sink, opts)
    }

    #[tokio::test]
    async fn test_batches_follow_file_and_row_order() {
        let source = source_with(&[
            ("customers", "part-00001", "3,Carol\n"),
            ("customers", "part-00000", "1,Ann\n2,Bob\n4,Dan\n"),
        ]);
        let sink = Arc::new(RecordingSink::default());
        let job = job_for(&source, sink.clone(), options(2)).await;

        let result = job.run("customers").await;
        assert!(matches!(
            result,
            JobResult::Completed(JobStats {
                files: 2,
                batches: 3,
                rows: 4
            })
        ));

        let batches = sink.batches.lock().unwrap().clone();
        let order: Vec<(String, usize, usize)> = batches
            .into_iter()
            .map(|(_, file, idx, len)| (file, idx, len))
            .collect();
        assert_eq!(
            order,
            vec![
                ("part-00000".to_string(), 0, 2),
                ("part-00000".to_string(), 1, 1),
                ("part-00001".to_string(), 0, 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_dataset_dir_is_not_found_without_writes() {
        let source = source_with(&[]);
        let sink = Arc::new(RecordingSink::default());
        let job = job_for(&source, sink.clone(), options(10)).await;

        let result = job.run("orders").await;
        assert!(matches!(result, JobResult::NotFound));
        assert_eq!(result.label(), "NotFound");
        assert!(sink.prepared.lock().unwrap().is_empty());
        assert_eq!(sink.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_dataset_fails() {
        let source = source_with(&[("products", "part-00000", "1,x\n")]);
        let sink = Arc::new(RecordingSink::default());
        let job = job_for(&source, sink.clone(), options(10)).await;

        match job.run("products").await {
            JobResult::Failed(e) => assert_eq!(e.kind(), ErrorKind::UnknownDataset),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(sink.prepared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_dataset_without_directory_fails() {
        let source = source_with(&[]);
        let sink = Arc::new(RecordingSink::default());
        let job = job_for(&source, sink.clone(), options(10)).await;

        match job.run("products").await {
            JobResult::Failed(e) => assert_eq!(e.kind(), ErrorKind::UnknownDataset),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(sink.prepared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_row_fails_job() {
        let source = source_with(&[("customers", "part-00000", "1,Ann\n2,Bob,extra\n")]);
        let sink = Arc::new(RecordingSink::default());
        let job = job_for(&source, sink, options(1)).await;

        let result = job.run("customers").await;
        match &result {
            JobResult::Failed(e) => assert_eq!(e.kind(), ErrorKind::MalformedRow),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(result.label(), "Failed(MalformedRow)");
    }

    #[tokio::test]
    async fn test_sink_failure_stops_remaining_batches() {
        let source = source_with(&[("customers", "part-00000", "1,a\n2,b\n3,c\n")]);
        let sink = Arc::new(RecordingSink {
            fail_on_batch: Some(1),
            ..RecordingSink::default()
        });
        let job = job_for(&source, sink.clone(), options(1)).await;

        match job.run("customers").await {
            JobResult::Failed(e) => assert_eq!(e.kind(), ErrorKind::SinkWriteFailed),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(sink.appends.load(Ordering::SeqCst), 2);
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_timeout() {
        let source = source_with(&[("customers", "part-00000", "1,a\n")]);
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_millis(500)),
            ..RecordingSink::default()
        });
        let opts = JobOptions {
            batch_timeout: Some(Duration::from_millis(20)),
            ..options(10)
        };
        let job = job_for(&source, sink, opts).await;

        match job.run("customers").await {
            JobResult::Failed(e) => {
                assert_eq!(e.kind(), ErrorKind::SinkWriteFailed);
                assert!(e.to_string().contains("timed out"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_telemetry_events() {
        let source = source_with(&[("customers", "part-00000", "1,a\n2,b\n3,c\n")]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let job = job_for(&source, Arc::new(RecordingSink::default()), options(2))
            .await
            .with_telemetry(tx);

        assert!(job.run("customers").await.is_success());
        drop(job);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events[0], TelemetryEvent::DatasetStarted));
        assert!(matches!(
            events[1],
            TelemetryEvent::BatchWritten { rows: 2, .. }
        ));
        assert!(matches!(
            events[2],
            TelemetryEvent::BatchWritten { rows: 1, .. }
        ));
        assert!(matches!(
            events[3],
            TelemetryEvent::DatasetFinished { success: true }
        ));
    }

    #[tokio::test]
    async fn test_run_dataset_writes_json_lines() {
        let source = source_with(&[(
            "orders",
            "part-00000",
            "1,2013-07-25 00:00:00.0,11599,CLOSED\n",
        )]);
        let target = TempDir::new().unwrap();
        let sink: Arc<dyn Sink> = Arc::new(JsonLinesSink::new(target.path()));

        let result = run_dataset(source.path(), sink, "orders", options(10)).await;
        assert!(result.is_success());

        let content =
            std::fs::read_to_string(target.path().join("orders").join("part-00000")).unwrap();
        assert_eq!(
            content,
            "{\"order_id\":\"1\",\"order_date\":\"2013-07-25 00:00:00.0\",\
             \"order_customer_id\":\"11599\",\"order_status\":\"CLOSED\"}\n"
        );
    }

    #[tokio::test]
    async fn test_run_dataset_without_schema_fails() {
        let source = TempDir::new().unwrap();
        let sink: Arc<dyn Sink> = Arc::new(RecordingSink::default());

        match run_dataset(source.path(), sink, "orders", JobOptions::default()).await {
            JobResult::Failed(e) => assert_eq!(e.kind(), ErrorKind::SchemaNotFound),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
