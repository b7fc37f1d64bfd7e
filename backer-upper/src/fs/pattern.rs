//! Source path patterns and exclusion rules.
//!
//! A source path is a concrete anchor directory optionally followed by `*`
//! segments, each matching any single directory name at that depth. Exclusions
//! are plain substrings tested against forward-slash paths.

use crate::utils::errors::{BackupError, Result};

const WILDCARD: &str = "*";

/// Normalize a path string to forward-slash form
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize a directory path to forward-slash form with a trailing slash
pub fn normalize_dir(path: &str) -> String {
    let mut path = normalize_path(path);
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}

/// A parsed source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePattern {
    segments: Vec<String>,
    first_wildcard: Option<usize>,
    literal_root: String,
    depth: usize,
}

impl SourcePattern {
    /// Parse a source path such as `/home/*/projects`
    pub fn parse(path: &str) -> Result<Self> {
        let normalized = normalize_path(path);
        let trimmed = match normalized.trim_end_matches('/') {
            // A bare "/" keeps its single empty anchor segment
            "" if normalized.starts_with('/') => "/",
            t => t,
        };
        let segments: Vec<String> = if trimmed == "/" {
            vec![String::new()]
        } else {
            trimmed.split('/').map(str::to_string).collect()
        };

        if let Some(partial) = segments
            .iter()
            .find(|s| s.contains(WILDCARD) && s.as_str() != WILDCARD)
        {
            return Err(BackupError::InvalidSourceSpec {
                path: path.to_string(),
                reason: format!("partial wildcard segment \"{}\" is not supported", partial),
            });
        }

        let first_wildcard = segments.iter().position(|s| s == WILDCARD);
        if first_wildcard == Some(0) {
            return Err(BackupError::InvalidSourceSpec {
                path: path.to_string(),
                reason: "source path must start with a non-wildcard directory".to_string(),
            });
        }

        let literal_end = first_wildcard.unwrap_or(segments.len());
        let literal_root = normalize_dir(&segments[..literal_end].join("/"));
        let depth = first_wildcard.map_or(0, |i| segments.len() - i);

        Ok(Self {
            segments,
            first_wildcard,
            literal_root,
            depth,
        })
    }

    /// Anchor directory up to (excluding) the first wildcard, with trailing slash
    pub fn literal_root(&self) -> &str {
        &self.literal_root
    }

    /// Number of directory levels below the literal root that roots live at
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn has_wildcard(&self) -> bool {
        self.first_wildcard.is_some()
    }

    /// Whether a discovered directory satisfies every literal segment of the pattern.
    ///
    /// The directory needs at least as many segments as the pattern, and each
    /// non-wildcard position must match exactly.
    pub fn matches(&self, dir: &str) -> bool {
        let dir = normalize_path(dir);
        let dir = dir.trim_end_matches('/');
        let parsed: Vec<&str> = dir.split('/').collect();

        if parsed.len() < self.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(parsed.iter())
            .all(|(expected, actual)| expected == WILDCARD || expected == actual)
    }
}

/// Exclusion rules of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    patterns: Vec<String>,
}

impl Exclusions {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| normalize_path(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// True if any exclusion occurs anywhere in the candidate path
    pub fn is_excluded(&self, candidate: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let candidate = normalize_path(candidate);
        self.patterns.iter().any(|p| candidate.contains(p.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal_path() -> Result<()> {
        let pattern = SourcePattern::parse("/data/projects")?;
        assert_eq!(pattern.literal_root(), "/data/projects/");
        assert_eq!(pattern.depth(), 0);
        assert!(!pattern.has_wildcard());
        Ok(())
    }

    #[test]
    fn test_parse_wildcard_depth() -> Result<()> {
        let pattern = SourcePattern::parse("/data/*/src")?;
        assert_eq!(pattern.literal_root(), "/data/");
        assert_eq!(pattern.depth(), 2);

        let pattern = SourcePattern::parse("c:\\projects\\*\\")?;
        assert_eq!(pattern.literal_root(), "c:/projects/");
        assert_eq!(pattern.depth(), 1);
        Ok(())
    }

    #[test]
    fn test_parse_root_slash() -> Result<()> {
        let pattern = SourcePattern::parse("/")?;
        assert_eq!(pattern.literal_root(), "/");
        assert_eq!(pattern.depth(), 0);

        let pattern = SourcePattern::parse("/*")?;
        assert_eq!(pattern.literal_root(), "/");
        assert_eq!(pattern.depth(), 1);
        Ok(())
    }

    #[test]
    fn test_leading_wildcard_rejected() {
        let err = SourcePattern::parse("*/data").unwrap_err();
        assert!(matches!(err, BackupError::InvalidSourceSpec { .. }));
    }

    #[test]
    fn test_partial_wildcard_rejected() {
        let err = SourcePattern::parse("/data/proj*").unwrap_err();
        assert!(matches!(err, BackupError::InvalidSourceSpec { .. }));
    }

    #[test]
    fn test_matches_literal_segments_after_wildcard() -> Result<()> {
        let pattern = SourcePattern::parse("/data/*/src")?;
        assert!(pattern.matches("/data/alpha/src/"));
        assert!(pattern.matches("/data/beta/src"));
        assert!(!pattern.matches("/data/alpha/docs/"));
        assert!(!pattern.matches("/data/alpha/"));
        assert!(!pattern.matches("/other/alpha/src/"));
        Ok(())
    }

    #[test]
    fn test_exclusion_is_substring_match() {
        let exclusions = Exclusions::new(&["node_modules", "\\.git\\", "tmp"]);
        assert!(exclusions.is_excluded("/src/app/node_modules/react/index.js"));
        assert!(exclusions.is_excluded("/src/app/.git/HEAD"));
        // Matches mid-segment too
        assert!(exclusions.is_excluded("/src/app/attmpt.txt"));
        assert!(!exclusions.is_excluded("/src/app/main.rs"));
    }

    #[test]
    fn test_empty_exclusions_match_nothing() {
        let exclusions = Exclusions::new(&["", ""]);
        assert!(exclusions.is_empty());
        assert!(!exclusions.is_excluded("/anything"));
    }
}
