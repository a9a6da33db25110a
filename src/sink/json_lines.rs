use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::Sink;
use crate::error::{EtlError, EtlResult};
use crate::formats::RowBatch;

/// Writes each dataset as newline-delimited JSON under a target directory.
///
/// Layout:
///   {target_root}/{dataset}/{part file name}
///
/// One output file per input file; every record becomes one JSON object line
/// keyed by schema column name. Existing files are appended to.
pub struct JsonLinesSink {
    target_root: PathBuf,
}

impl JsonLinesSink {
    pub fn new(target_root: impl AsRef<Path>) -> Self {
        Self {
            target_root: target_root.as_ref().to_path_buf(),
        }
    }

    fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.target_root.join(dataset)
    }

    /// Output path for one input file of `dataset`
    pub fn output_path(&self, dataset: &str, file_name: &str) -> PathBuf {
        self.dataset_dir(dataset).join(file_name)
    }

    fn encode(batch: &RowBatch) -> serde_json::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        for record in batch.records() {
            serde_json::to_writer(&mut buffer, &record)?;
            buffer.push(b'\n');
        }
        Ok(buffer)
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    fn describe(&self) -> String {
        self.target_root.display().to_string()
    }

    async fn prepare(&self, dataset: &str, _columns: &[String]) -> EtlResult<()> {
        let dir = self.dataset_dir(dataset);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| EtlError::SinkUnavailable {
                target: dir.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn append_batch(&self, dataset: &str, batch: &RowBatch) -> EtlResult<()> {
        let write_failed = |reason: String| EtlError::SinkWriteFailed {
            dataset: dataset.to_string(),
            file: batch.file_name.clone(),
            batch: batch.index,
            reason,
        };

        let path = self.output_path(dataset, &batch.file_name);
        let encoded = Self::encode(batch).map_err(|e| write_failed(e.to_string()))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| write_failed(format!("cannot open {}: {}", path.display(), e)))?;

        file.write_all(&encoded)
            .await
            .map_err(|e| write_failed(e.to_string()))?;
        file.flush().await.map_err(|e| write_failed(e.to_string()))?;

        Ok(())
    }
}
