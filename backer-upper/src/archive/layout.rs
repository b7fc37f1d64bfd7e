//! On-disk layout of archive directories.
//!
//! Every source root gets one directory below the backup target. Each run
//! writes `<file-time> (<yyyy-MM-dd HH-mm-ss>).tar.zst` and a `.log` file with
//! the same base name into it.

use crate::fs::metadata::file_time;
use chrono::{DateTime, Local, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const CONTAINER_EXTENSION: &str = "tar.zst";
pub const LOG_EXTENSION: &str = "log";

/// Escape a source root path into a single directory name
pub fn escape_content_path(content_path: &str) -> String {
    let normalized = content_path.replace('\\', "/");
    let trimmed = normalized.strip_suffix('/').unwrap_or(&normalized);
    trimmed.replace(':', "").replace(' ', "_").replace('/', " ")
}

/// Directory holding every container and log of one source root
pub fn archive_dir(target: &Path, content_path: &str) -> PathBuf {
    target.join(escape_content_path(content_path))
}

/// Name shared by a run's container and log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunName {
    file_time: i64,
    label: String,
}

impl RunName {
    /// Name for a run starting now
    pub fn now() -> Self {
        let now = SystemTime::now();
        let local: DateTime<Local> = DateTime::<Utc>::from(now).with_timezone(&Local);
        Self {
            file_time: file_time(now),
            label: local.format("%Y-%m-%d %H-%M-%S").to_string(),
        }
    }

    pub fn file_time(&self) -> i64 {
        self.file_time
    }

    /// Next distinct name, used when a run with this name already exists
    pub fn bump(&self) -> Self {
        Self {
            file_time: self.file_time + 1,
            label: self.label.clone(),
        }
    }

    /// Move past `latest` when the clock reads earlier than an existing run,
    /// so the newest run always carries the largest file-time.
    pub fn after(self, latest: Option<i64>) -> Self {
        match latest {
            Some(latest) if latest >= self.file_time => Self {
                file_time: latest.saturating_add(1),
                label: self.label,
            },
            _ => self,
        }
    }

    /// The identifier stored in log entries
    pub fn base_name(&self) -> String {
        format!("{} ({})", self.file_time, self.label)
    }

    pub fn container_file(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.base_name(), CONTAINER_EXTENSION))
    }

    pub fn log_file(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.base_name(), LOG_EXTENSION))
    }
}

/// File-time embedded at the start of a run file name
pub fn parse_file_time(file_name: &str) -> Option<i64> {
    file_name.split(' ').next()?.split('.').next()?.parse().ok()
}

/// Most recent log in an archive directory, by embedded file-time.
///
/// Returns `None` when the directory does not exist or holds no logs. Files
/// whose names carry no file-time are ignored.
pub fn most_recent_log(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    Ok(latest_log(dir)?.map(|(_, path)| path))
}

/// File-time of the most recent log, see [`most_recent_log`]
pub fn most_recent_log_time(dir: &Path) -> std::io::Result<Option<i64>> {
    Ok(latest_log(dir)?.map(|(time, _)| time))
}

fn latest_log(dir: &Path) -> std::io::Result<Option<(i64, PathBuf)>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut latest: Option<(i64, PathBuf)> = None;
    for entry in read_dir {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
            continue;
        }
        let Some(time) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_file_time)
        else {
            continue;
        };
        if latest.as_ref().map_or(true, |(best, _)| time > *best) {
            latest = Some((time, path));
        }
    }

    Ok(latest)
}
