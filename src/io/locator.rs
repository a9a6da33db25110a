use std::path::{Path, PathBuf};

use tokio::fs;

use crate::config::PART_FILE_PREFIX;
use crate::error::{EtlError, EtlResult};

/// List the input files of `dataset`: every regular file directly under
/// `<source_root>/<dataset>/` whose name matches `part-*`.
///
/// Paths come back sorted by file name. File contents and extensions are not
/// inspected. A missing directory is reported the same way as an empty one.
pub async fn list_files(source_root: &Path, dataset: &str) -> EtlResult<Vec<PathBuf>> {
    let dir = source_root.join(dataset);
    let not_found = || EtlError::NoFilesFound {
        dataset: dataset.to_string(),
        dir: dir.clone(),
    };

    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "dataset directory not readable");
            return Err(not_found());
        }
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        tracing::debug!(dir = %dir.display(), error = %e, "failed to list dataset directory");
        not_found()
    })? {
        let is_part_file = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(PART_FILE_PREFIX));
        if !is_part_file {
            continue;
        }

        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file {
            files.push(entry.path());
        }
    }

    if files.is_empty() {
        return Err(not_found());
    }

    files.sort();
    Ok(files)
}
