//! Backer Upper Library
//!
//! Incremental file-level backups: scans source directories, archives only
//! new and changed files into a timestamped container per source root, and
//! keeps a change log per run so the next run can detect changes and
//! deletions without re-reading unchanged content.

pub mod archive;
pub mod config;
pub mod executor;
pub mod fs;
pub mod utils;

// Re-export commonly used types
pub use archive::log::{ChangeLog, FileStatus, LogEntry};
pub use archive::{ArchiveRun, FileOutcome, RunOptions, RunOutcome};
pub use config::{BackupMode, Config, SourceSpec};
pub use executor::{BackupExecutor, BackupResult, RootSummary};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
