//! Change logs: the per-run record of every file's archiving status.
//!
//! A log is a UTF-8 text file with one `path|STATUS|mtime|size|archive` line
//! per file. The log written by a run is append-only; the previous run's log is
//! loaded fully into memory and only queried.

use crate::utils::errors::{BackupError, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Separator between log fields. Paths containing it cannot be logged.
pub const FIELD_SEPARATOR: char = '|';

const FIELD_COUNT: usize = 5;

/// Archiving status of a file within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Created,
    Unchanged,
    Changed,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Created => "CREATED",
            FileStatus::Unchanged => "UNCHANGED",
            FileStatus::Changed => "CHANGED",
            FileStatus::Deleted => "DELETED",
        }
    }

    /// Whether the file's bytes are written to the run's container
    pub fn is_archived(&self) -> bool {
        matches!(self, FileStatus::Created | FileStatus::Changed)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(FileStatus::Created),
            "UNCHANGED" => Ok(FileStatus::Unchanged),
            "CHANGED" => Ok(FileStatus::Changed),
            "DELETED" => Ok(FileStatus::Deleted),
            _ => Err(format!("unknown status \"{}\"", s)),
        }
    }
}

/// One line of a change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Root-relative, forward-slash path
    pub path: String,
    pub status: FileStatus,
    /// File-time units, later of creation and modification time
    pub mtime: i64,
    pub size: u64,
    /// Base name of the container holding the file's last archived bytes
    pub archive: String,
}

impl LogEntry {
    /// Whether `path` can be written as a log field without corrupting the line
    pub fn is_loggable_path(path: &str) -> bool {
        !path.is_empty() && !path.contains([FIELD_SEPARATOR, '\n', '\r'])
    }

    /// The same file recorded as gone, keeping its last known location
    pub fn as_deleted(&self) -> LogEntry {
        LogEntry {
            status: FileStatus::Deleted,
            ..self.clone()
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{path}{sep}{status}{sep}{mtime}{sep}{size}{sep}{archive}",
            path = self.path,
            status = self.status,
            mtime = self.mtime,
            size = self.size,
            archive = self.archive,
            sep = FIELD_SEPARATOR,
        )
    }
}

impl FromStr for LogEntry {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return Err(format!("expected {} fields, found {}", FIELD_COUNT, fields.len()));
        }

        let mtime = fields[2]
            .parse::<i64>()
            .map_err(|e| format!("invalid mtime \"{}\": {}", fields[2], e))?;
        let size = fields[3]
            .parse::<u64>()
            .map_err(|e| format!("invalid size \"{}\": {}", fields[3], e))?;

        Ok(LogEntry {
            path: fields[0].to_string(),
            status: fields[1].parse()?,
            mtime,
            size,
            archive: fields[4].to_string(),
        })
    }
}

/// A change log on disk plus an in-memory index of its entries.
#[derive(Debug)]
pub struct ChangeLog {
    path: PathBuf,
    /// Present only for a log opened for writing
    writer: Option<File>,
    entries: Vec<LogEntry>,
    index: HashMap<String, usize>,
}

impl ChangeLog {
    /// Create a new, empty log for writing. Never overwrites an existing file.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = OpenOptions::new().write(true).create_new(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            entries: Vec::new(),
            index: HashMap::new(),
        })
    }

    /// Read an existing log completely. The result is read-only.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut log = Self {
            path: path.to_path_buf(),
            writer: None,
            entries: Vec::new(),
            index: HashMap::new(),
        };

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let entry = line.parse::<LogEntry>().map_err(|reason| BackupError::LogParse {
                path: path.to_path_buf(),
                line: number + 1,
                reason,
            })?;
            log.insert(entry);
        }

        Ok(log)
    }

    /// Write one entry through to disk and index it.
    ///
    /// A path that is already present is replaced in the index; the later
    /// line wins when the log is loaded again.
    pub fn append(&mut self, entry: LogEntry) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            BackupError::InvalidState(format!("log {} is read-only", self.path.display()))
        })?;
        if !LogEntry::is_loggable_path(&entry.path) {
            return Err(BackupError::InvalidState(format!(
                "path {:?} cannot be written to a change log",
                entry.path
            )));
        }

        writer.write_all(format!("{}\n", entry).as_bytes())?;
        self.insert(entry);
        Ok(())
    }

    fn insert(&mut self, entry: LogEntry) {
        match self.index.get(&entry.path) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.index.insert(entry.path.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn find(&self, path: &str) -> Option<&LogEntry> {
        self.index.get(path).map(|&position| &self.entries[position])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Entries in first-written order, one per path
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the log, deleting it if it holds no entries. Returns whether it was kept.
    pub fn finalize(self) -> Result<bool> {
        if self.is_empty() {
            self.discard()?;
            return Ok(false);
        }
        if let Some(writer) = self.writer {
            writer.sync_all()?;
        }
        Ok(true)
    }

    /// Close the log and remove it from disk regardless of its content
    pub fn discard(self) -> Result<()> {
        drop(self.writer);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
