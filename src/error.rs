//! Error taxonomy shared by the pipeline stages

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving, reading or writing a dataset.
///
/// Every variant maps to one [`ErrorKind`], which is what per-dataset reports
/// show. Everything except the dispatcher's own schema load is caught at the
/// dataset job boundary and turned into a `JobResult`.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("schema document not found at {}", path.display())]
    SchemaNotFound { path: PathBuf },

    #[error("schema document {} is malformed: {reason}", path.display())]
    SchemaMalformed { path: PathBuf, reason: String },

    #[error("dataset '{dataset}' is not defined in the schema document")]
    UnknownDataset { dataset: String },

    #[error("no part-* files found for dataset '{dataset}' under {}", dir.display())]
    NoFilesFound { dataset: String, dir: PathBuf },

    #[error("cannot read source file {}: {reason}", path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("malformed row at {}:{line}: {reason}", path.display())]
    MalformedRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("sink {target} is unavailable: {reason}")]
    SinkUnavailable { target: String, reason: String },

    #[error("failed to write batch {batch} of {dataset}/{file}: {reason}")]
    SinkWriteFailed {
        dataset: String,
        file: String,
        batch: usize,
        reason: String,
    },

    #[error("job for dataset '{dataset}' panicked: {reason}")]
    JobPanicked { dataset: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Tag of an [`EtlError`], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SchemaNotFound,
    SchemaMalformed,
    UnknownDataset,
    NoFilesFound,
    SourceUnreadable,
    MalformedRow,
    SinkUnavailable,
    SinkWriteFailed,
    JobPanicked,
    InvalidConfig,
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::SchemaNotFound { .. } => ErrorKind::SchemaNotFound,
            EtlError::SchemaMalformed { .. } => ErrorKind::SchemaMalformed,
            EtlError::UnknownDataset { .. } => ErrorKind::UnknownDataset,
            EtlError::NoFilesFound { .. } => ErrorKind::NoFilesFound,
            EtlError::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            EtlError::MalformedRow { .. } => ErrorKind::MalformedRow,
            EtlError::SinkUnavailable { .. } => ErrorKind::SinkUnavailable,
            EtlError::SinkWriteFailed { .. } => ErrorKind::SinkWriteFailed,
            EtlError::JobPanicked { .. } => ErrorKind::JobPanicked,
            EtlError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SchemaNotFound => "SchemaNotFound",
            ErrorKind::SchemaMalformed => "SchemaMalformed",
            ErrorKind::UnknownDataset => "UnknownDataset",
            ErrorKind::NoFilesFound => "NoFilesFound",
            ErrorKind::SourceUnreadable => "SourceUnreadable",
            ErrorKind::MalformedRow => "MalformedRow",
            ErrorKind::SinkUnavailable => "SinkUnavailable",
            ErrorKind::SinkWriteFailed => "SinkWriteFailed",
            ErrorKind::JobPanicked => "JobPanicked",
            ErrorKind::InvalidConfig => "InvalidConfig",
        };
        f.write_str(name)
    }
}

pub type EtlResult<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = EtlError::UnknownDataset {
            dataset: "orders".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::UnknownDataset);
        assert_eq!(err.kind().to_string(), "UnknownDataset");
    }

    #[test]
    fn test_display_includes_location() {
        let err = EtlError::MalformedRow {
            path: PathBuf::from("/data/orders/part-0000"),
            line: 7,
            reason: "expected 2 fields, found 3".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/orders/part-0000:7"));
        assert!(msg.contains("expected 2 fields"));
    }
}
