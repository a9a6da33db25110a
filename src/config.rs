//! Configuration constants for the dataset loader
//!
//! This module centralizes the tunable defaults and fixed names used throughout
//! the pipeline. Run-specific values live in `runner::EtlArgs`.

use std::time::Duration;

// ============================================================================
// Source Layout
// ============================================================================

/// Schema document file name, relative to the source root
pub const SCHEMA_FILE_NAME: &str = "schemas.json";

/// Prefix shared by every input file of a dataset (`part-*`)
pub const PART_FILE_PREFIX: &str = "part-";

// ============================================================================
// Reader / Dispatcher Configuration
// ============================================================================

/// Number of rows per batch handed to a sink
///
/// 10k rows keeps a batch of typical narrow rows in the low megabytes, so the
/// reader can stream files that are much larger than memory.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Upper bound on concurrently running dataset jobs
pub const MAX_WORKERS: usize = 8;

// ============================================================================
// Table Sink Configuration
// ============================================================================

/// Postgres caps a single statement at 65535 bind parameters
pub const MAX_BIND_PARAMS: usize = 65_535;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
