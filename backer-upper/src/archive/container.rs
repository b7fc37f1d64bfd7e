//! Content container: a zstd-compressed tar stream, written once per run.

use crate::utils::errors::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::{Builder, Header, HeaderMode};

/// Write-once container for the bytes of created and changed files.
pub struct Container {
    path: PathBuf,
    builder: Builder<zstd::Encoder<'static, File>>,
    empty: bool,
}

impl Container {
    /// Create the container file. Fails if a file already exists at `path`.
    pub fn create(path: &Path, compression_level: i32) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let encoder = zstd::Encoder::new(file, compression_level)?;

        Ok(Self {
            path: path.to_path_buf(),
            builder: Builder::new(encoder),
            empty: true,
        })
    }

    /// Copy a file into the container under `name`.
    ///
    /// Size and mode are taken from the opened file so the tar header always
    /// matches the bytes that follow it. If the file fails or shrinks after
    /// its header is written, the entry is zero-filled to its declared size
    /// so later entries stay readable, and the error is returned.
    pub fn append_file(&mut self, source: &Path, name: &str) -> io::Result<u64> {
        let file = File::open(source)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", source.display()),
            ));
        }

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
        header.set_entry_type(tar::EntryType::Regular);
        self.append_reader(&mut header, name, metadata.len(), file)
    }

    fn append_reader<R: Read>(
        &mut self,
        header: &mut Header,
        name: &str,
        size: u64,
        reader: R,
    ) -> io::Result<u64> {
        header.set_size(size);
        let mut data = ExactReader::new(reader, size);
        self.builder.append_data(header, name, &mut data)?;

        if let Some(e) = data.error {
            // The padded entry is never logged, so it does not make the container non-empty
            return Err(e);
        }
        self.empty = false;
        Ok(size)
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finish the stream and close the file, deleting it if nothing was
    /// written. Returns whether the container was kept.
    pub fn finish(self) -> Result<bool> {
        let encoder = self.builder.into_inner()?;
        let file = encoder.finish()?;

        if self.empty {
            drop(file);
            fs::remove_file(&self.path)?;
            return Ok(false);
        }

        file.sync_all()?;
        Ok(true)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("path", &self.path)
            .field("empty", &self.empty)
            .finish()
    }
}

/// Yields exactly `remaining` bytes, zero-filling after a read error or early EOF.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
    error: Option<io::Error>,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, remaining: u64) -> Self {
        Self {
            inner,
            remaining,
            error: None,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let limit = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let buf = &mut buf[..limit];

        let read = if self.error.is_some() {
            0
        } else {
            match self.inner.read(buf) {
                Ok(0) => {
                    self.error = Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("file ended {} bytes short", self.remaining),
                    ));
                    0
                }
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
                Err(e) => {
                    self.error = Some(e);
                    0
                }
            }
        };

        let filled = if read == 0 {
            buf.fill(0);
            buf.len()
        } else {
            read
        };
        self.remaining -= filled as u64;
        Ok(filled)
    }
}

/// List `(name, contents)` of every entry in a container
pub fn read_entries(path: &Path) -> io::Result<Vec<(String, Vec<u8>)>> {
    let decoder = zstd::Decoder::new(File::open(path)?)?;
    let mut archive = tar::Archive::new(decoder);

    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().replace('\\', "/");
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents)?;
        entries.push((name, contents));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_container_keeps_written_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("source.txt");
        fs::write(&source, b"hello container")?;

        let path = temp_dir.path().join("out/run.tar.zst");
        let mut container = Container::create(&path, 3)?;
        assert_eq!(container.append_file(&source, "dir/source.txt")?, 15);
        assert!(!container.is_empty());
        assert!(container.finish()?);

        let entries = read_entries(&path)?;
        assert_eq!(entries, vec![("dir/source.txt".to_string(), b"hello container".to_vec())]);
        Ok(())
    }

    #[test]
    fn test_empty_container_is_deleted() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("run.tar.zst");

        let container = Container::create(&path, 3)?;
        assert!(path.exists());
        assert!(!container.finish()?);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_missing_source_leaves_container_empty() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("run.tar.zst");

        let mut container = Container::create(&path, 3)?;
        assert!(container.append_file(&temp_dir.path().join("missing"), "missing").is_err());
        assert!(container.is_empty());
        assert!(!container.finish()?);
        Ok(())
    }

    /// Yields `good` bytes, then fails
    struct FailingReader {
        good: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.good == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "device error"));
            }
            let n = self.good.min(buf.len());
            buf[..n].fill(b'x');
            self.good -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_failed_read_keeps_later_entries_readable() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("after.txt");
        fs::write(&source, b"still here")?;

        let path = temp_dir.path().join("run.tar.zst");
        let mut container = Container::create(&path, 3)?;

        let mut header = Header::new_gnu();
        header.set_mode(0o644);
        let failed = container.append_reader(&mut header, "broken.bin", 2000, FailingReader { good: 700 });
        assert!(failed.is_err());
        assert!(container.is_empty());

        container.append_file(&source, "after.txt")?;
        assert!(container.finish()?);

        let entries = read_entries(&path)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1.len(), 2000);
        assert_eq!(entries[1], ("after.txt".to_string(), b"still here".to_vec()));
        Ok(())
    }

    #[test]
    fn test_short_read_is_an_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("run.tar.zst");
        let mut container = Container::create(&path, 3)?;

        let mut header = Header::new_gnu();
        let result = container.append_reader(&mut header, "shrunk.txt", 100, &b"only 17 bytes now"[..]);
        assert_eq!(result.map_err(|e| e.kind()), Err(io::ErrorKind::UnexpectedEof));
        assert!(!container.finish()?);
        Ok(())
    }

    #[test]
    fn test_directory_is_rejected_before_writing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("run.tar.zst");
        let mut container = Container::create(&path, 3)?;

        assert!(container.append_file(temp_dir.path(), "dir").is_err());
        assert!(container.is_empty());
        assert!(!container.finish()?);
        Ok(())
    }

    #[test]
    fn test_long_names_survive() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("f");
        fs::write(&source, b"x")?;
        let name = format!("{}/file.txt", "deep/".repeat(40).trim_end_matches('/'));

        let path = temp_dir.path().join("run.tar.zst");
        let mut container = Container::create(&path, 1)?;
        container.append_file(&source, &name)?;
        container.finish()?;

        assert_eq!(read_entries(&path)?[0].0, name);
        Ok(())
    }
}
