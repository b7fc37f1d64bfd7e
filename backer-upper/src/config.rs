//! Configuration management for backer-upper.
//!
//! Loads configuration from a TOML file (or the legacy JSON document when the
//! file ends in `.json`) and validates it before any backup starts.

use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File read by [`BackupMode::DefaultConfig`], relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "backer-upper.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory that receives one archive directory per source root
    pub target: PathBuf,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub log: LogConfig,

    /// Backup sources, processed in order
    pub sources: Vec<SourceSpec>,
}

/// One configured backup source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Root path, optionally containing `*` segments
    pub path: String,

    /// Substring exclusions matched against forward-slash paths
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// zstd compression level used for every container (1-22)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Compare against the previous run's log and only archive changes
    #[serde(default = "default_compare_previous")]
    pub compare_previous: bool,

    /// Follow symbolic links to directories while scanning
    #[serde(default)]
    pub follow_links: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_compression_level() -> i32 {
    3
}

fn default_compare_previous() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
            compare_previous: default_compare_previous(),
            follow_links: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SourceSpec {
    pub fn new(path: impl Into<String>, exclude: Vec<String>) -> Self {
        Self {
            path: path.into(),
            exclude,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, or JSON if the extension is `.json`
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: Config = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Build a single-source configuration from explicit values
    pub fn from_source(source: String, target: PathBuf, exclude: Vec<String>) -> Result<Self> {
        let config = Config {
            target,
            archive: ArchiveConfig::default(),
            log: LogConfig::default(),
            sources: vec![SourceSpec::new(source, exclude)],
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful backup
    pub fn validate(&self) -> Result<()> {
        if self.target.as_os_str().is_empty() {
            return Err(BackupError::Config("target must not be empty".to_string()));
        }
        if self.sources.is_empty() {
            return Err(BackupError::Config("at least one source is required".to_string()));
        }
        if let Some(source) = self.sources.iter().find(|s| s.path.trim().is_empty()) {
            return Err(BackupError::Config(format!(
                "source path must not be empty (excludes: {:?})",
                source.exclude
            )));
        }
        let levels = zstd::compression_level_range();
        if !levels.contains(&self.archive.compression_level) {
            return Err(BackupError::Config(format!(
                "compression_level {} is outside {}..={}",
                self.archive.compression_level,
                levels.start(),
                levels.end()
            )));
        }
        Ok(())
    }
}

/// The ways a backup can be requested. Exactly one applies per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupMode {
    /// Read [`DEFAULT_CONFIG_FILE`] from the working directory
    DefaultConfig,

    /// Read the given configuration file
    ConfigFile(PathBuf),

    /// Back up one source into one target, no configuration file
    Explicit {
        source: String,
        target: PathBuf,
        exclude: Vec<String>,
    },
}

impl BackupMode {
    /// Resolve into a validated configuration
    pub fn resolve(self) -> Result<Config> {
        match self {
            BackupMode::DefaultConfig => Config::from_file(Path::new(DEFAULT_CONFIG_FILE)),
            BackupMode::ConfigFile(path) => Config::from_file(&path),
            BackupMode::Explicit {
                source,
                target,
                exclude,
            } => Config::from_source(source, target, exclude),
        }
    }
}
