use async_trait::async_trait;

use super::Sink;
use crate::config::MAX_BIND_PARAMS;
use crate::db::Pool;
use crate::db::sql::{create_table_ddl, insert_statements};
use crate::error::{EtlError, EtlResult};
use crate::formats::RowBatch;

/// Appends each dataset's rows to the table of the same name.
///
/// Every batch is inserted in its own transaction. Nothing spans batches, so
/// a failure part way through a file leaves the earlier batches committed.
pub struct TableSink {
    pool: Pool,
    label: String,
    create_table_if_missing: bool,
    max_params: usize,
}

impl TableSink {
    /// `label` identifies the store in logs; pass a redacted URL, never a password
    pub fn new(pool: Pool, label: impl Into<String>, create_table_if_missing: bool) -> Self {
        Self {
            pool,
            label: label.into(),
            create_table_if_missing,
            max_params: MAX_BIND_PARAMS,
        }
    }

    /// Override the per-statement bind parameter cap
    pub fn with_max_params(mut self, max_params: usize) -> Self {
        self.max_params = max_params.max(1);
        self
    }

    fn unavailable(&self, err: &sqlx::Error) -> EtlError {
        EtlError::SinkUnavailable {
            target: self.label.clone(),
            reason: err.to_string(),
        }
    }
}

/// Errors that mean the store could not be reached at all
fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_)
    )
}

#[async_trait]
impl Sink for TableSink {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn prepare(&self, dataset: &str, columns: &[String]) -> EtlResult<()> {
        if self.create_table_if_missing {
            let ddl = create_table_ddl(dataset, columns);
            tracing::debug!(dataset, "ensuring table exists");
            self.pool
                .execute_query(&ddl)
                .await
                .map_err(|e| self.unavailable(&e))
        } else {
            self.pool.ping().await.map_err(|e| self.unavailable(&e))
        }
    }

    async fn append_batch(&self, dataset: &str, batch: &RowBatch) -> EtlResult<()> {
        let statements = insert_statements(dataset, &batch.columns, batch.len(), self.max_params);
        if statements.is_empty() {
            return Ok(());
        }

        self.pool
            .insert_in_transaction(&statements, &batch.rows)
            .await
            .map_err(|e| {
                if is_connection_error(&e) {
                    self.unavailable(&e)
                } else {
                    EtlError::SinkWriteFailed {
                        dataset: dataset.to_string(),
                        file: batch.file_name.clone(),
                        batch: batch.index,
                        reason: e.to_string(),
                    }
                }
            })
    }
}
