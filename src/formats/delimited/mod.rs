pub mod reader;

pub use reader::ChunkedReader;
