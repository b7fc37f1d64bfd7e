//! Archive runs - one container and one change log per source root per backup.
//!
//! A run classifies every scanned file against the previous run's log, copies
//! new and changed content into its container and records every file in its
//! own log. Finalizing the run records files that disappeared since the
//! previous run as DELETED, so each kept log is a full snapshot of the root.
//!
//! Runs against the same archive directory must not overlap; nothing here
//! locks the directory.

pub mod container;
pub mod layout;
pub mod log;

use crate::fs::metadata::FileMetadata;
use crate::utils::errors::{BackupError, Result};
use self::container::Container;
use self::layout::RunName;
use self::log::{ChangeLog, FileStatus, LogEntry};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-run archive settings
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// zstd level for the container
    pub compression_level: i32,

    /// Load the previous log and archive only new and changed files
    pub compare_previous: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            compression_level: 3,
            compare_previous: true,
        }
    }
}

/// Result of offering one file to a run
#[derive(Debug)]
pub enum FileOutcome {
    Archived(FileStatus),
    /// The file could not be read or copied; the run continues
    Failed(io::Error),
}

/// Summary returned by [`ArchiveRun::finalize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Files present in the previous log but not seen by this run
    pub deleted: usize,
    pub container_kept: bool,
    pub log_kept: bool,
    /// Base name shared by the run's container and log
    pub run_name: String,
}

/// Decide a file's status from its previous log entry and current metadata
pub fn classify(previous: Option<&LogEntry>, mtime: i64, size: u64) -> FileStatus {
    match previous {
        None => FileStatus::Created,
        Some(entry) if entry.status == FileStatus::Deleted => FileStatus::Created,
        Some(entry) if entry.mtime == mtime && entry.size == size => FileStatus::Unchanged,
        Some(_) => FileStatus::Changed,
    }
}

enum RunState {
    Unopened,
    Open(OpenRun),
    Finalized,
}

struct OpenRun {
    name: RunName,
    container: Container,
    current: ChangeLog,
    previous: Option<ChangeLog>,
}

/// One backup run of one source root.
pub struct ArchiveRun {
    archive_dir: PathBuf,
    options: RunOptions,
    state: RunState,
    previous_log_error: Option<String>,
}

impl ArchiveRun {
    /// Prepare a run for `content_path` below `target`. Nothing touches disk
    /// until [`ArchiveRun::create`].
    pub fn new(target: &Path, content_path: &str, options: RunOptions) -> Self {
        Self {
            archive_dir: layout::archive_dir(target, content_path),
            options,
            state: RunState::Unopened,
            previous_log_error: None,
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Why the previous log was ignored, if it was unreadable
    pub fn previous_log_error(&self) -> Option<&str> {
        self.previous_log_error.as_deref()
    }

    /// Open the container and the current log, loading the previous log first.
    pub fn create(&mut self) -> Result<()> {
        if !matches!(self.state, RunState::Unopened) {
            return Err(BackupError::InvalidState(format!(
                "archive in {} was already created",
                self.archive_dir.display()
            )));
        }

        // Must happen before the new log exists, or it would be picked as previous
        let previous = if self.options.compare_previous {
            self.load_previous()
        } else {
            None
        };

        let mut name = RunName::now().after(self.latest_run_time());
        let container = loop {
            if name.log_file(&self.archive_dir).exists() {
                name = name.bump();
                continue;
            }
            match Container::create(
                &name.container_file(&self.archive_dir),
                self.options.compression_level,
            ) {
                Ok(container) => break container,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => name = name.bump(),
                Err(e) => return Err(e.into()),
            }
        };

        let current = match ChangeLog::create(&name.log_file(&self.archive_dir)) {
            Ok(log) => log,
            Err(e) => {
                if let Err(cleanup) = container.finish() {
                    warn!("Failed to remove unused container: {}", cleanup);
                }
                return Err(e);
            }
        };

        info!(
            "Opened archive {} in {}",
            name.base_name(),
            self.archive_dir.display()
        );
        self.state = RunState::Open(OpenRun {
            name,
            container,
            current,
            previous,
        });
        Ok(())
    }

    /// File-time of the newest log already in the archive directory
    fn latest_run_time(&self) -> Option<i64> {
        match layout::most_recent_log_time(&self.archive_dir) {
            Ok(latest) => latest,
            Err(e) => {
                debug!("Cannot list {}: {}", self.archive_dir.display(), e);
                None
            }
        }
    }

    fn load_previous(&mut self) -> Option<ChangeLog> {
        let path = match layout::most_recent_log(&self.archive_dir) {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!("No previous log in {}", self.archive_dir.display());
                return None;
            }
            Err(e) => {
                warn!(
                    "Cannot search {} for a previous log, archiving every file: {}",
                    self.archive_dir.display(),
                    e
                );
                self.previous_log_error = Some(e.to_string());
                return None;
            }
        };

        match ChangeLog::load(&path) {
            Ok(log) => {
                info!("Comparing against {} ({} entries)", path.display(), log.len());
                Some(log)
            }
            Err(e) => {
                warn!("Ignoring unreadable previous log, archiving every file: {}", e);
                self.previous_log_error = Some(e.to_string());
                None
            }
        }
    }

    /// Classify one file, archive its content if needed and log it.
    ///
    /// Read and copy failures are returned as [`FileOutcome::Failed`]. An
    /// `Err` means the run itself is unusable (wrong state, log not writable).
    pub fn write_file(&mut self, root: &Path, relative: &str) -> Result<FileOutcome> {
        let run = match &mut self.state {
            RunState::Open(run) => run,
            RunState::Unopened => {
                return Err(BackupError::InvalidState(
                    "cannot write to an archive before create()".to_string(),
                ))
            }
            RunState::Finalized => {
                return Err(BackupError::InvalidState(
                    "cannot write to a finalized archive".to_string(),
                ))
            }
        };

        if !LogEntry::is_loggable_path(relative) {
            return Ok(FileOutcome::Failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path {:?} cannot be recorded in a change log", relative),
            )));
        }

        match run.store(&root.join(relative), relative) {
            Ok(entry) => {
                let status = entry.status;
                debug!("{} {}", status, relative);
                run.current.append(entry)?;
                Ok(FileOutcome::Archived(status))
            }
            Err(e) => {
                warn!("Failed reading and archiving {}: {}", relative, e);
                run.carry_forward(relative)?;
                Ok(FileOutcome::Failed(e))
            }
        }
    }

    /// Record deletions, close the container and both logs.
    pub fn finalize(&mut self) -> Result<RunOutcome> {
        match std::mem::replace(&mut self.state, RunState::Finalized) {
            RunState::Open(run) => run.finish(),
            RunState::Unopened => {
                self.state = RunState::Unopened;
                Err(BackupError::InvalidState(
                    "cannot finalize an archive that was never created".to_string(),
                ))
            }
            RunState::Finalized => Err(BackupError::InvalidState(
                "archive already finalized".to_string(),
            )),
        }
    }

    /// Give up on an open run, removing its container and log.
    pub fn abort(&mut self) -> Result<()> {
        if let RunState::Open(run) = std::mem::replace(&mut self.state, RunState::Finalized) {
            let container_path = run.container.path().to_path_buf();
            run.current.discard()?;
            if run.container.finish()? {
                std::fs::remove_file(container_path)?;
            }
        }
        Ok(())
    }
}

impl OpenRun {
    fn previous_entry(&self, relative: &str) -> Option<&LogEntry> {
        self.previous.as_ref().and_then(|log| log.find(relative))
    }

    fn store(&mut self, source: &Path, relative: &str) -> io::Result<LogEntry> {
        let metadata = FileMetadata::from_path(source)?;
        let previous = self.previous_entry(relative);
        let status = classify(previous, metadata.mtime, metadata.size);

        let archive = match (status, previous) {
            (FileStatus::Unchanged, Some(previous)) => previous.archive.clone(),
            _ => self.name.base_name(),
        };

        if status.is_archived() {
            self.container.append_file(source, relative)?;
        }

        Ok(LogEntry {
            path: relative.to_string(),
            status,
            mtime: metadata.mtime,
            size: metadata.size,
            archive,
        })
    }

    /// Keep a failed file's previous entry so it is not taken for a deletion
    fn carry_forward(&mut self, relative: &str) -> Result<()> {
        let Some(previous) = self.previous_entry(relative) else {
            return Ok(());
        };
        let status = match previous.status {
            FileStatus::Deleted => FileStatus::Deleted,
            _ => FileStatus::Unchanged,
        };
        let entry = LogEntry {
            status,
            ..previous.clone()
        };
        self.current.append(entry)
    }

    fn record_deletions(&mut self) -> Result<usize> {
        let Some(previous) = &self.previous else {
            return Ok(0);
        };

        let mut deleted = 0;
        for entry in previous.entries() {
            if self.current.contains(&entry.path) {
                continue;
            }
            // Older tombstones are carried along but were already counted
            if entry.status != FileStatus::Deleted {
                debug!("DELETED {}", entry.path);
                deleted += 1;
            }
            self.current.append(entry.as_deleted())?;
        }
        Ok(deleted)
    }

    fn finish(mut self) -> Result<RunOutcome> {
        let deletions = self.record_deletions();
        let run_name = self.name.base_name();
        let has_content = !self.container.is_empty();

        let (deleted, container_kept) = match (deletions, self.container.finish()) {
            (Ok(deleted), Ok(container_kept)) => (deleted, container_kept),
            (Err(e), _) | (_, Err(e)) => {
                // An incomplete snapshot or unfinished container must not become the next baseline
                if let Err(cleanup) = self.current.discard() {
                    warn!("Failed to remove log of failed run: {}", cleanup);
                }
                return Err(e);
            }
        };

        // Without content or deletions the log repeats the previous snapshot
        let log_kept = if has_content || deleted > 0 {
            self.current.finalize()?
        } else {
            self.current.discard()?;
            false
        };

        if let Some(previous) = self.previous {
            previous.finalize()?;
        }

        Ok(RunOutcome {
            deleted,
            container_kept,
            log_kept,
            run_name,
        })
    }
}
