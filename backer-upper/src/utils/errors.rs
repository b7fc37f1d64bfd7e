//! Custom error types for backer-upper.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid source path \"{path}\": {reason}")]
    InvalidSourceSpec { path: String, reason: String },

    #[error("Invalid archive state: {0}")]
    InvalidState(String),

    #[error("Malformed log {} at line {line}: {reason}", path.display())]
    LogParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
