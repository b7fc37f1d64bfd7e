//! Backup executor - drives scanning and archiving for every configured source.
//!
//! Sources are processed in configuration order and the roots of each source
//! in scan order, one [`ArchiveRun`] per root. Nothing that goes wrong for a
//! single source, root or file stops the backup; every failure ends up in the
//! returned [`BackupResult`].

use crate::archive::log::FileStatus;
use crate::archive::{ArchiveRun, FileOutcome, RunOptions};
use crate::config::Config;
use crate::fs::walker::{scan_roots, ResolvedRoot, WalkOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A source whose path could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    pub source: String,
    pub error: String,
}

/// A file that could not be read or archived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub path: String,
    pub reason: String,
}

/// Outcome of backing up one source root
#[derive(Debug, Clone, Default)]
pub struct RootSummary {
    /// Configured source path the root was resolved from
    pub source: String,
    pub root: String,
    pub archive_dir: PathBuf,
    /// Base name of the run's container and log
    pub run_name: Option<String>,

    /// Files offered to the archive, failed ones included
    pub total: usize,
    pub created: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub deleted: usize,
    pub failed: Vec<FailedFile>,

    /// Failure that stopped this root's run
    pub error: Option<String>,
    /// Set when the previous log was unreadable and every file was archived
    pub previous_log_error: Option<String>,
}

impl RootSummary {
    fn new(root: &ResolvedRoot<'_>) -> Self {
        Self {
            source: root.source.path.clone(),
            root: root.dir.clone(),
            ..Self::default()
        }
    }

    fn record(&mut self, status: FileStatus) {
        match status {
            FileStatus::Created => self.created += 1,
            FileStatus::Unchanged => self.unchanged += 1,
            FileStatus::Changed => self.changed += 1,
            FileStatus::Deleted => self.deleted += 1,
        }
    }
}

/// Sums over every root of a backup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupTotals {
    pub roots: usize,
    pub files: usize,
    pub created: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Backup execution result
#[derive(Debug, Clone, Default)]
pub struct BackupResult {
    pub roots: Vec<RootSummary>,
    pub source_errors: Vec<SourceError>,
    pub duration: Duration,
}

impl BackupResult {
    pub fn totals(&self) -> BackupTotals {
        self.roots.iter().fold(
            BackupTotals::default(),
            |mut totals, root| {
                totals.roots += 1;
                totals.files += root.total;
                totals.created += root.created;
                totals.unchanged += root.unchanged;
                totals.changed += root.changed;
                totals.deleted += root.deleted;
                totals.failed += root.failed.len();
                totals
            },
        )
    }

    /// `(root, relative path)` of every file that failed
    pub fn failed_files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.roots.iter().flat_map(|root| {
            root.failed
                .iter()
                .map(move |file| (root.root.as_str(), file.path.as_str()))
        })
    }

    /// True when no source, root or file failed
    pub fn is_complete(&self) -> bool {
        self.source_errors.is_empty()
            && self
                .roots
                .iter()
                .all(|root| root.error.is_none() && root.failed.is_empty())
    }
}

/// Main backup executor
pub struct BackupExecutor {
    config: Config,
}

impl BackupExecutor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            follow_links: self.config.archive.follow_links,
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            compression_level: self.config.archive.compression_level,
            compare_previous: self.config.archive.compare_previous,
        }
    }

    /// Back up every configured source
    pub fn execute(&self) -> BackupResult {
        let start_time = Instant::now();
        let mut result = BackupResult::default();

        info!(
            "Starting backup of {} source(s) into {}",
            self.config.sources.len(),
            self.config.target.display()
        );

        for source in &self.config.sources {
            let roots = match scan_roots(source, self.walk_options()) {
                Ok(roots) => roots,
                Err(e) => {
                    error!("Skipping source {}: {}", source.path, e);
                    result.source_errors.push(SourceError {
                        source: source.path.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let before = result.roots.len();
            for root in roots {
                result.roots.push(self.backup_root(&root));
            }
            if result.roots.len() == before {
                warn!("Source {} matched no directories", source.path);
            }
        }

        result.duration = start_time.elapsed();
        let totals = result.totals();
        info!(
            "Backup completed: {} roots, {} files ({} created, {} changed, {} unchanged, {} deleted, {} failed), {}s",
            totals.roots,
            totals.files,
            totals.created,
            totals.changed,
            totals.unchanged,
            totals.deleted,
            totals.failed,
            result.duration.as_secs()
        );

        result
    }

    /// Archive one root, never failing the overall backup
    fn backup_root(&self, root: &ResolvedRoot<'_>) -> RootSummary {
        let mut summary = RootSummary::new(root);
        let mut run = ArchiveRun::new(&self.config.target, &root.dir, self.run_options());
        summary.archive_dir = run.archive_dir().to_path_buf();

        info!("Archiving root {}", root.dir);
        if let Err(e) = run.create() {
            error!("Cannot open archive for {}: {}", root.dir, e);
            summary.error = Some(e.to_string());
            return summary;
        }
        summary.previous_log_error = run.previous_log_error().map(str::to_string);

        let root_path = root.path();
        for relative in root.files() {
            summary.total += 1;
            match run.write_file(&root_path, &relative) {
                Ok(FileOutcome::Archived(status)) => summary.record(status),
                Ok(FileOutcome::Failed(e)) => summary.failed.push(FailedFile {
                    path: relative,
                    reason: e.to_string(),
                }),
                Err(e) => {
                    error!("Aborting archive of {}: {}", root.dir, e);
                    summary.error = Some(e.to_string());
                    if let Err(cleanup) = run.abort() {
                        warn!("Failed to clean up aborted archive: {}", cleanup);
                    }
                    return summary;
                }
            }
        }

        match run.finalize() {
            Ok(outcome) => {
                summary.deleted += outcome.deleted;
                if outcome.log_kept {
                    summary.run_name = Some(outcome.run_name);
                }
            }
            Err(e) => {
                error!("Failed to finalize archive for {}: {}", root.dir, e);
                summary.error = Some(e.to_string());
            }
        }

        info!(
            "Archived root {}: {} files ({} created, {} changed, {} unchanged, {} deleted, {} failed)",
            root.dir,
            summary.total,
            summary.created,
            summary.changed,
            summary.unchanged,
            summary.deleted,
            summary.failed.len()
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveConfig, LogConfig, SourceSpec};
    use std::fs;
    use tempfile::TempDir;

    fn config(target: PathBuf, sources: Vec<SourceSpec>) -> Config {
        Config {
            target,
            archive: ArchiveConfig::default(),
            log: LogConfig::default(),
            sources,
        }
    }

    #[test]
    fn test_bad_source_does_not_stop_others() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("source");
        fs::create_dir_all(&source)?;
        fs::write(source.join("file.txt"), b"content")?;

        let executor = BackupExecutor::new(config(
            temp_dir.path().join("target"),
            vec![
                SourceSpec::new("*/nowhere", vec![]),
                SourceSpec::new(source.to_string_lossy(), vec![]),
            ],
        ));
        let result = executor.execute();

        assert_eq!(result.source_errors.len(), 1);
        assert_eq!(result.source_errors[0].source, "*/nowhere");
        assert_eq!(result.totals().created, 1);
        assert!(!result.is_complete());
        Ok(())
    }

    #[test]
    fn test_unopenable_target_is_root_error() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("source");
        fs::create_dir_all(&source)?;
        fs::write(source.join("file.txt"), b"content")?;
        // A file where the target directory should be
        let target = temp_dir.path().join("target");
        fs::write(&target, b"in the way")?;

        let executor = BackupExecutor::new(config(
            target,
            vec![SourceSpec::new(source.to_string_lossy(), vec![])],
        ));
        let result = executor.execute();

        assert_eq!(result.roots.len(), 1);
        assert!(result.roots[0].error.is_some());
        assert_eq!(result.roots[0].total, 0);
        Ok(())
    }

    #[test]
    fn test_totals_and_failed_files() {
        let result = BackupResult {
            roots: vec![
                RootSummary {
                    root: "/a/".to_string(),
                    total: 3,
                    created: 2,
                    failed: vec![FailedFile {
                        path: "x.bin".to_string(),
                        reason: "denied".to_string(),
                    }],
                    ..RootSummary::default()
                },
                RootSummary {
                    root: "/b/".to_string(),
                    total: 4,
                    unchanged: 3,
                    changed: 1,
                    deleted: 2,
                    ..RootSummary::default()
                },
            ],
            ..BackupResult::default()
        };

        let totals = result.totals();
        assert_eq!(totals.roots, 2);
        assert_eq!(totals.files, 7);
        assert_eq!(totals.deleted, 2);
        assert_eq!(totals.failed, 1);
        assert_eq!(result.failed_files().collect::<Vec<_>>(), vec![("/a/", "x.bin")]);
    }
}
