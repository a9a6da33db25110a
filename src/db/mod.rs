//! Database layer - connection pooling and SQL generation for the table sink

pub mod pool;
pub mod sql;

pub use pool::{Pool, PoolArgsBuilder};
