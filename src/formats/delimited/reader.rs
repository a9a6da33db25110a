use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{EtlError, EtlResult};
use crate::formats::reader::{DelimitedConfig, RowBatch};

/// Streams a headerless delimited file as consecutive [`RowBatch`]es.
///
/// Only one batch is materialized at a time, so files larger than memory can
/// be processed. The iterator is finite and single-pass: once it returns
/// `None` (or an error) a new reader has to be opened to traverse the file again.
///
/// A row whose field count does not match the column count, or which is not
/// valid UTF-8, ends the read with `MalformedRow`. Rows are never skipped.
pub struct ChunkedReader<R: Read> {
    path: PathBuf,
    file_name: String,
    columns: Arc<[String]>,
    batch_size: usize,
    csv_reader: csv::Reader<R>,
    record: csv::StringRecord,
    next_index: usize,
    done: bool,
}

impl ChunkedReader<File> {
    /// Open `path` for reading; `columns` are assigned positionally to each row
    pub fn open(
        path: &Path,
        columns: Arc<[String]>,
        batch_size: usize,
        config: &DelimitedConfig,
    ) -> EtlResult<Self> {
        let file = File::open(path).map_err(|e| EtlError::SourceUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_reader(path, file, columns, batch_size, config))
    }
}

impl<R: Read> ChunkedReader<R> {
    pub fn from_reader(
        path: &Path,
        reader: R,
        columns: Arc<[String]>,
        batch_size: usize,
        config: &DelimitedConfig,
    ) -> Self {
        let csv_reader = csv::ReaderBuilder::new()
            .delimiter(config.delimiter)
            .quote(config.quote)
            .has_headers(false)
            // Field counts are checked against the schema, not the first row
            .flexible(true)
            .from_reader(reader);

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            path: path.to_path_buf(),
            file_name,
            columns,
            batch_size: batch_size.max(1),
            csv_reader,
            record: csv::StringRecord::new(),
            next_index: 0,
            done: false,
        }
    }

    fn read_batch(&mut self) -> EtlResult<Option<RowBatch>> {
        let mut rows = Vec::with_capacity(self.batch_size);

        while rows.len() < self.batch_size {
            let has_record = self
                .csv_reader
                .read_record(&mut self.record)
                .map_err(|e| self.csv_error(e))?;
            if !has_record {
                break;
            }

            if self.record.len() != self.columns.len() {
                return Err(EtlError::MalformedRow {
                    path: self.path.clone(),
                    line: self.record.position().map(|p| p.line()).unwrap_or(0),
                    reason: format!(
                        "expected {} fields, found {}",
                        self.columns.len(),
                        self.record.len()
                    ),
                });
            }

            rows.push(self.record.iter().map(str::to_string).collect());
        }

        if rows.is_empty() {
            return Ok(None);
        }

        let batch = RowBatch {
            file_name: self.file_name.clone(),
            index: self.next_index,
            columns: Arc::clone(&self.columns),
            rows,
        };
        self.next_index += 1;
        Ok(Some(batch))
    }

    fn csv_error(&self, err: csv::Error) -> EtlError {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(e) => EtlError::SourceUnreadable {
                path: self.path.clone(),
                reason: e.to_string(),
            },
            csv::ErrorKind::Utf8 { err, .. } => EtlError::MalformedRow {
                path: self.path.clone(),
                line,
                reason: format!("invalid UTF-8: {err}"),
            },
            other => EtlError::MalformedRow {
                path: self.path.clone(),
                line,
                reason: format!("{other:?}"),
            },
        }
    }
}

impl<R: Read> Iterator for ChunkedReader<R> {
    type Item = EtlResult<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn columns(names: &[&str]) -> Arc<[String]> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn reader_for<'a>(
        content: &'a [u8],
        cols: &[&str],
        batch_size: usize,
    ) -> ChunkedReader<&'a [u8]> {
        ChunkedReader::from_reader(
            Path::new("/src/orders/part-0000"),
            content,
            columns(cols),
            batch_size,
            &DelimitedConfig::csv(),
        )
    }

    #[test]
    fn test_single_batch_with_schema_names() {
        let batches: Vec<RowBatch> = reader_for(b"1,9.99\n2,4.50\n", &["id", "amount"], 10)
            .collect::<EtlResult<_>>()
            .unwrap();

        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.file_name, "part-0000");
        assert_eq!(batch.index, 0);
        assert_eq!(&*batch.columns, &["id".to_string(), "amount".to_string()]);
        assert_eq!(batch.rows, vec![vec!["1", "9.99"], vec!["2", "4.50"]]);
    }

    #[test]
    fn test_batch_count_and_round_trip() {
        // (rows, batch size)
        let cases: [(usize, usize); 5] = [(25, 10), (30, 10), (1, 10), (10, 1), (7, 7)];

        for (rows, batch_size) in cases {
            let content: String = (0..rows).map(|i| format!("{},name_{}\n", i, i)).collect();
            let batches: Vec<RowBatch> =
                reader_for(content.as_bytes(), &["id", "name"], batch_size)
                    .collect::<EtlResult<_>>()
                    .unwrap();

            let expected_batches = rows.div_ceil(batch_size);
            assert_eq!(batches.len(), expected_batches, "rows={rows} b={batch_size}");

            for (idx, batch) in batches.iter().enumerate() {
                assert_eq!(batch.index, idx);
                if idx + 1 < batches.len() {
                    assert_eq!(batch.len(), batch_size);
                }
            }
            let last_len = if rows % batch_size == 0 {
                batch_size
            } else {
                rows % batch_size
            };
            assert_eq!(batches.last().unwrap().len(), last_len);

            let ids: Vec<String> = batches
                .iter()
                .flat_map(|b| b.rows.iter().map(|r| r[0].clone()))
                .collect();
            let expected: Vec<String> = (0..rows).map(|i| i.to_string()).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn test_empty_file_yields_no_batches() {
        let mut reader = reader_for(b"", &["id"], 10);
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_quoted_fields() {
        let batches: Vec<RowBatch> = reader_for(
            b"1,\"Smith, John\"\n2,\"said \"\"hi\"\"\"\n",
            &["id", "name"],
            10,
        )
        .collect::<EtlResult<_>>()
        .unwrap();

        assert_eq!(batches[0].rows[0][1], "Smith, John");
        assert_eq!(batches[0].rows[1][1], "said \"hi\"");
    }

    #[test]
    fn test_wrong_field_count_fails_and_fuses() {
        let mut reader = reader_for(b"1,9.99\n2,4.50,extra\n3,1.00\n", &["id", "amount"], 1);

        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRow);
        assert!(err.to_string().contains(":2:"), "got: {err}");
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut reader = reader_for(b"1,\xff\xfe\n", &["id", "name"], 10);
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRow);
    }

    #[test]
    fn test_tsv_delimiter() {
        let reader = ChunkedReader::from_reader(
            Path::new("part-1"),
            &b"1\ta,b\n"[..],
            columns(&["id", "tags"]),
            10,
            &DelimitedConfig::tsv(),
        );
        let batches: Vec<RowBatch> = reader.collect::<EtlResult<_>>().unwrap();
        assert_eq!(batches[0].rows[0], vec!["1", "a,b"]);
    }

    #[test]
    fn test_open_reads_from_disk() {
        let mut temp_file = NamedTempFile::new().unwrap();
        for i in 0..5 {
            writeln!(temp_file, "{},{}", i, i * 10).unwrap();
        }
        temp_file.flush().unwrap();

        let reader = ChunkedReader::open(
            temp_file.path(),
            columns(&["id", "value"]),
            2,
            &DelimitedConfig::csv(),
        )
        .unwrap();
        let sizes: Vec<usize> = reader.map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_open_missing_file() {
        let result = ChunkedReader::open(
            Path::new("/nonexistent/part-0000"),
            columns(&["id"]),
            10,
            &DelimitedConfig::csv(),
        );
        assert_eq!(result.err().unwrap().kind(), ErrorKind::SourceUnreadable);
    }
}
