//! Schema resolution and delimited file parsing

pub mod delimited;
pub mod reader;
pub mod schema;

pub use delimited::ChunkedReader;
pub use reader::{DelimitedConfig, Format, Record, RowBatch};
pub use schema::{ColumnDef, SchemaDocument};
