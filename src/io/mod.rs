//! Source discovery and store addressing

pub mod locator;
pub mod uri;

pub use locator::list_files;
pub use uri::{StoreParams, StoreUrl};
