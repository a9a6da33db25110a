use anyhow::Result;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;

/// A bounded group of decoded rows from one input file.
///
/// Column names are assigned once, when the rows are read; `rows[i][j]` is the
/// raw value of `columns[j]`. A batch is written by exactly one sink call.
#[derive(Debug, Clone)]
pub struct RowBatch {
    /// File name of the part file the rows came from (e.g. `part-00000`)
    pub file_name: String,
    /// Zero-based position of this batch within its file
    pub index: usize,
    pub columns: Arc<[String]>,
    pub rows: Vec<Vec<String>>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Records of this batch as `column -> value` views, in file order
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(|values| Record {
            columns: &self.columns,
            values,
        })
    }
}

/// A single row paired with its column names.
///
/// Serializes as an object whose keys follow schema column order.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [String],
    values: &'a [String],
}

impl Serialize for Record<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Configuration for delimited file reading (CSV, TSV, etc.)
///
/// Input files never carry a header row; column names come from the schema.
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self::default()
    }

    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            quote: b'"',
        }
    }
}

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Csv,
    Tsv,
}

impl Format {
    /// Parse format from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "tsv" => Ok(Format::Tsv),
            _ => Err(anyhow::anyhow!(
                "Unsupported format: {}. Supported formats: csv, tsv",
                s
            )),
        }
    }

    pub fn delimited_config(self) -> DelimitedConfig {
        match self {
            Format::Csv => DelimitedConfig::csv(),
            Format::Tsv => DelimitedConfig::tsv(),
        }
    }
}
