//! File metadata used for change detection.
//!
//! Timestamps are file-time units: 100-nanosecond intervals since
//! 1601-01-01 UTC, the resolution change logs are written in.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 100ns intervals between 1601-01-01 and 1970-01-01
const FILE_TIME_UNIX_OFFSET: i64 = 116_444_736_000_000_000;

/// Convert a system time to file-time units
pub fn file_time(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => FILE_TIME_UNIX_OFFSET.saturating_add(ticks(after)),
        Err(before) => FILE_TIME_UNIX_OFFSET.saturating_sub(ticks(before.duration())),
    }
}

fn ticks(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX)
}

/// Metadata recorded for every backed-up file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Later of creation and last-write time, in file-time units
    pub mtime: i64,
}

impl FileMetadata {
    /// Extract metadata from a file path, following symlinks
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Self::from_metadata(&metadata)
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> std::io::Result<Self> {
        let modified = metadata.modified()?;
        // Not every filesystem records a birth time
        let latest = match metadata.created() {
            Ok(created) if created > modified => created,
            _ => modified,
        };

        Ok(Self {
            size: metadata.len(),
            mtime: file_time(latest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_time_epoch() {
        assert_eq!(file_time(UNIX_EPOCH), FILE_TIME_UNIX_OFFSET);
        assert_eq!(
            file_time(UNIX_EPOCH + Duration::from_secs(1)),
            FILE_TIME_UNIX_OFFSET + 10_000_000
        );
        assert_eq!(
            file_time(UNIX_EPOCH - Duration::from_secs(1)),
            FILE_TIME_UNIX_OFFSET - 10_000_000
        );
    }

    #[test]
    fn test_extract_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = FileMetadata::from_path(temp_file.path())?;
        let modified = file_time(fs::metadata(temp_file.path())?.modified()?);

        assert_eq!(metadata.size, 12);
        assert!(metadata.mtime >= modified);
        Ok(())
    }
}
