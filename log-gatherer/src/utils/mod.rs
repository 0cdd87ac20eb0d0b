//! Utility modules for the log gatherer.

pub mod errors;
pub mod logger;

pub use errors::{GathererError, Result};
