//! Utility modules for backer-upper.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
