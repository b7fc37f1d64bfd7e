//! File system scanning: source patterns, directory walking and file metadata.

pub mod metadata;
pub mod pattern;
pub mod walker;

pub use metadata::FileMetadata;
pub use pattern::{Exclusions, SourcePattern};
pub use walker::{scan_roots, FileScan, ResolvedRoot, RootScan, WalkOptions};
