use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::SCHEMA_FILE_NAME;
use crate::error::{EtlError, EtlResult};

/// One column of a dataset as declared in `schemas.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(rename = "column_name")]
    pub name: String,
    #[serde(rename = "column_position")]
    pub position: i64,
}

/// Column definitions of a single dataset, in document order
#[derive(Debug, Clone)]
pub struct DatasetSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

/// The parsed schema document: dataset name -> ordered column definitions.
///
/// Loaded once per run and shared read-only between dataset jobs.
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    path: PathBuf,
    datasets: Vec<DatasetSchema>,
}

impl SchemaDocument {
    /// Read `<source_root>/schemas.json`
    pub async fn load(source_root: &Path) -> EtlResult<Self> {
        let path = source_root.join(SCHEMA_FILE_NAME);

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EtlError::SchemaNotFound { path });
            }
            Err(e) => {
                return Err(EtlError::SchemaMalformed {
                    path,
                    reason: format!("unreadable: {e}"),
                });
            }
        };

        Self::parse(path, &contents)
    }

    /// Parse a schema document from its JSON text; `path` is only used for errors
    pub fn parse(path: PathBuf, contents: &str) -> EtlResult<Self> {
        let parsed: DatasetMap = match serde_json::from_str(contents) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Err(EtlError::SchemaMalformed {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        Ok(Self {
            path,
            datasets: parsed.0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every dataset declared in the document, in document order
    pub fn dataset_names(&self) -> Vec<String> {
        self.datasets.iter().map(|ds| ds.name.clone()).collect()
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.datasets.iter().any(|ds| ds.name == dataset)
    }

    /// Column names of `dataset`, ascending by position.
    ///
    /// The sort is stable: columns sharing a position keep their document order.
    /// A dataset that declares no columns, or the same column name twice, is
    /// `SchemaMalformed` for that dataset only; the rest of the document stays usable.
    pub fn column_names(&self, dataset: &str) -> EtlResult<Vec<String>> {
        let schema = self
            .datasets
            .iter()
            .find(|ds| ds.name == dataset)
            .ok_or_else(|| EtlError::UnknownDataset {
                dataset: dataset.to_string(),
            })?;

        let malformed = |reason: String| EtlError::SchemaMalformed {
            path: self.path.clone(),
            reason,
        };

        if schema.columns.is_empty() {
            return Err(malformed(format!("dataset '{}' declares no columns", dataset)));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = schema.columns.iter().find(|col| !seen.insert(col.name.as_str())) {
            return Err(malformed(format!(
                "dataset '{}' declares column '{}' more than once",
                dataset, dup.name
            )));
        }

        let mut columns: Vec<&ColumnDef> = schema.columns.iter().collect();
        columns.sort_by_key(|col| col.position);

        Ok(columns.into_iter().map(|col| col.name.clone()).collect())
    }
}

/// Top-level JSON object, kept in document order.
///
/// A dataset key that appears twice keeps its first slot but takes the later
/// definition, which is how a plain JSON object load behaves.
struct DatasetMap(Vec<DatasetSchema>);

impl<'de> Deserialize<'de> for DatasetMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DatasetMapVisitor;

        impl<'de> Visitor<'de> for DatasetMapVisitor {
            type Value = DatasetMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an object mapping dataset names to column lists")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut datasets: Vec<DatasetSchema> = Vec::new();

                while let Some(name) = map.next_key::<String>()? {
                    let columns: Vec<ColumnDef> = map.next_value()?;
                    match datasets.iter_mut().find(|ds| ds.name == name) {
                        Some(existing) => existing.columns = columns,
                        None => datasets.push(DatasetSchema { name, columns }),
                    }
                }

                Ok(DatasetMap(datasets))
            }
        }

        deserializer.deserialize_map(DatasetMapVisitor)
    }
}
