//! Per-dataset jobs and the bounded pool that runs them

pub mod dispatcher;
pub mod job;

pub use dispatcher::{Dispatcher, worker_cap};
pub use job::{DatasetJob, JobOptions, JobResult, JobStats, run_dataset};
