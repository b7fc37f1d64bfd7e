//! Directory traversal for backup sources.
//!
//! [`scan_roots`] expands a source path into concrete root directories and
//! [`ResolvedRoot::files`] lazily lists the files under one of them. Both walks
//! prune excluded directories instead of filtering their contents, and treat
//! directories that cannot be listed as empty.

use crate::config::SourceSpec;
use crate::fs::pattern::{normalize_dir, normalize_path, Exclusions, SourcePattern};
use crate::utils::errors::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Options for directory walking
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    /// Follow symbolic links to directories
    pub follow_links: bool,
}

/// A concrete, wildcard-free root directory discovered for a source.
#[derive(Debug, Clone)]
pub struct ResolvedRoot<'a> {
    /// Source the root was resolved from
    pub source: &'a SourceSpec,

    /// Forward-slash directory path with trailing slash
    pub dir: String,

    exclusions: Exclusions,
    options: WalkOptions,
}

impl<'a> ResolvedRoot<'a> {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }

    /// Start a single-pass scan of every non-excluded file below this root
    pub fn files(&self) -> FileScan {
        FileScan::new(&self.dir, self.exclusions.clone(), self.options)
    }
}

/// Resolve a source into its root directories.
///
/// Fails only when the source path itself is invalid; unreadable directories
/// are logged and skipped while iterating.
pub fn scan_roots(source: &SourceSpec, options: WalkOptions) -> Result<RootScan<'_>> {
    let pattern = SourcePattern::parse(&source.path)?;
    let exclusions = Exclusions::new(&source.exclude);

    let state = if pattern.depth() == 0 {
        RootScanState::Literal(pattern.literal_root().to_string())
    } else {
        let walker = WalkDir::new(pattern.literal_root())
            .follow_links(options.follow_links)
            .max_depth(pattern.depth())
            .sort_by_file_name()
            .into_iter();
        RootScanState::Walk(walker)
    };

    Ok(RootScan {
        source,
        pattern,
        exclusions,
        options,
        state,
    })
}

enum RootScanState {
    /// No wildcard: the literal root is the only candidate
    Literal(String),
    Walk(walkdir::IntoIter),
    Done,
}

/// Iterator over the roots of one source, see [`scan_roots`].
pub struct RootScan<'a> {
    source: &'a SourceSpec,
    pattern: SourcePattern,
    exclusions: Exclusions,
    options: WalkOptions,
    state: RootScanState,
}

impl<'a> RootScan<'a> {
    fn resolved(&self, dir: String) -> ResolvedRoot<'a> {
        ResolvedRoot {
            source: self.source,
            dir,
            exclusions: self.exclusions.clone(),
            options: self.options,
        }
    }

    fn next_walked(&mut self) -> Option<String> {
        let RootScanState::Walk(walker) = &mut self.state else {
            return None;
        };

        loop {
            let entry = match walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot list directory while resolving {}: {}", self.source.path, e);
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            let dir = normalize_dir(&entry.path().to_string_lossy());
            if self.exclusions.is_excluded(&dir) {
                debug!("Excluded directory {}", dir);
                if entry.depth() == 0 {
                    return None;
                }
                walker.skip_current_dir();
                continue;
            }

            if entry.depth() == self.pattern.depth() && self.pattern.matches(&dir) {
                return Some(dir);
            }
        }
    }
}

impl<'a> Iterator for RootScan<'a> {
    type Item = ResolvedRoot<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let dir = match std::mem::replace(&mut self.state, RootScanState::Done) {
            RootScanState::Literal(root) => {
                if self.exclusions.is_excluded(&root) {
                    debug!("Excluded source root {}", root);
                    return None;
                }
                if !Path::new(&root).is_dir() {
                    warn!("Source root {} does not exist or is not a directory", root);
                }
                root
            }
            RootScanState::Walk(walker) => {
                self.state = RootScanState::Walk(walker);
                match self.next_walked() {
                    Some(dir) => dir,
                    None => {
                        self.state = RootScanState::Done;
                        return None;
                    }
                }
            }
            RootScanState::Done => return None,
        };

        Some(self.resolved(dir))
    }
}

/// Lazy, single-pass listing of root-relative file paths.
pub struct FileScan {
    inner: walkdir::IntoIter,
    root: PathBuf,
    root_dir: String,
    exclusions: Exclusions,
}

impl FileScan {
    fn new(root_dir: &str, exclusions: Exclusions, options: WalkOptions) -> Self {
        let root = PathBuf::from(root_dir);
        let inner = WalkDir::new(&root)
            .follow_links(options.follow_links)
            .sort_by_file_name()
            .into_iter();

        Self {
            inner,
            root,
            root_dir: normalize_dir(root_dir),
            exclusions,
        }
    }

    fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        normalize_path(&relative.to_string_lossy())
    }
}

impl Iterator for FileScan {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable path under {}: {}", self.root_dir, e);
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let relative = self.relative(entry.path());
            let full = format!("{}{}", self.root_dir, relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if self.exclusions.is_excluded(&normalize_dir(&full)) {
                    debug!("Excluded directory {}", full);
                    self.inner.skip_current_dir();
                }
                continue;
            }

            if self.exclusions.is_excluded(&full) {
                debug!("Excluded file {}", full);
                continue;
            }

            if file_type.is_symlink() {
                // Links are backed up through to regular files only
                match std::fs::metadata(entry.path()) {
                    Ok(target) if target.is_file() => {}
                    Ok(_) => {
                        debug!("Skipping symlink to non-file {}", full);
                        continue;
                    }
                    Err(e) => {
                        debug!("Skipping broken symlink {}: {}", full, e);
                        continue;
                    }
                }
            } else if !file_type.is_file() {
                debug!("Skipping special file {}", full);
                continue;
            }

            return Some(relative);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn source(root: &Path, suffix: &str, exclude: &[&str]) -> SourceSpec {
        SourceSpec::new(
            format!("{}{}", normalize_dir(&root.to_string_lossy()), suffix),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn root_dirs(source: &SourceSpec) -> Result<Vec<String>> {
        Ok(scan_roots(source, WalkOptions::default())?
            .map(|root| root.dir)
            .collect())
    }

    #[test]
    fn test_literal_source_yields_itself() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let configured = source(temp_dir.path(), "", &[]);

        let roots = root_dirs(&configured)?;
        assert_eq!(roots, vec![normalize_dir(&temp_dir.path().to_string_lossy())]);
        Ok(())
    }

    #[test]
    fn test_wildcard_resolves_exact_depth() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        fs::create_dir_all(base.join("a/data/deeper/data"))?;
        fs::create_dir_all(base.join("b/data"))?;
        fs::create_dir_all(base.join("b/logs"))?;
        fs::create_dir_all(base.join("data"))?;
        fs::write(base.join("c"), b"not a directory")?;

        let configured = source(base, "*/data", &[]);
        let roots = root_dirs(&configured)?;

        let prefix = normalize_dir(&base.to_string_lossy());
        assert_eq!(roots, vec![format!("{}a/data/", prefix), format!("{}b/data/", prefix)]);
        Ok(())
    }

    #[test]
    fn test_wildcard_prunes_excluded_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        fs::create_dir_all(base.join("keep/x"))?;
        fs::create_dir_all(base.join("skip_me/x"))?;

        let configured = source(base, "*/*", &["skip_me"]);
        let roots = root_dirs(&configured)?;

        assert_eq!(roots.len(), 1);
        assert!(roots[0].ends_with("keep/x/"));
        Ok(())
    }

    #[test]
    fn test_excluded_literal_root_yields_nothing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let excluded = temp_dir.path().to_string_lossy().to_string();
        let configured = source(temp_dir.path(), "", &[excluded.as_str()]);

        assert!(root_dirs(&configured)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_leading_wildcard_is_rejected() {
        let configured = SourceSpec::new("*/data", vec![]);
        assert!(scan_roots(&configured, WalkOptions::default()).is_err());
    }

    #[test]
    fn test_scan_files_relative_and_sorted() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        fs::create_dir_all(base.join("sub/inner"))?;
        fs::write(base.join("b.txt"), b"b")?;
        fs::write(base.join("a.txt"), b"a")?;
        fs::write(base.join("sub/inner/c.txt"), b"c")?;

        let configured = source(base, "", &[]);
        let root = scan_roots(&configured, WalkOptions::default())?.next().unwrap();
        let files: Vec<String> = root.files().collect();

        assert_eq!(files, vec!["a.txt", "b.txt", "sub/inner/c.txt"]);
        Ok(())
    }

    #[test]
    fn test_scan_files_applies_exclusions() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        fs::create_dir_all(base.join("node_modules/pkg"))?;
        fs::create_dir_all(base.join("src"))?;
        fs::write(base.join("node_modules/pkg/index.js"), b"x")?;
        fs::write(base.join("src/main.rs"), b"fn main() {}")?;
        fs::write(base.join("src/main.rs.bak"), b"old")?;

        let configured = source(base, "", &["node_modules", ".bak"]);
        let root = scan_roots(&configured, WalkOptions::default())?.next().unwrap();
        let files: Vec<String> = root.files().collect();

        assert_eq!(files, vec!["src/main.rs"]);
        Ok(())
    }

    #[test]
    fn test_scan_files_missing_root_is_empty() {
        let scan = FileScan::new(
            "/nonexistent/backer-upper/root/",
            Exclusions::default(),
            WalkOptions::default(),
        );
        assert_eq!(scan.count(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_scan_files_follows_file_symlinks_only() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        fs::create_dir_all(base.join("dir"))?;
        fs::write(base.join("real.txt"), b"real")?;
        std::os::unix::fs::symlink(base.join("real.txt"), base.join("link.txt"))?;
        std::os::unix::fs::symlink(base.join("dir"), base.join("dirlink"))?;
        std::os::unix::fs::symlink(base.join("missing"), base.join("broken"))?;

        let configured = source(base, "", &[]);
        let root = scan_roots(&configured, WalkOptions::default())?.next().unwrap();
        let files: Vec<String> = root.files().collect();

        assert_eq!(files, vec!["link.txt", "real.txt"]);
        Ok(())
    }
}
