/*!
 * Configuration structures and defaults for Umbra
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, UmbraError};

/// Checksum algorithm for file digests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlg {
    /// MD5 (32 hex chars)
    Md5,
    /// SHA-256 (64 hex chars)
    Sha256,
    /// SHA-512 (128 hex chars)
    Sha512,
}

impl Default for ChecksumAlg {
    fn default() -> Self {
        Self::Sha256
    }
}

impl ChecksumAlg {
    /// Parse algorithm from string (e.g., "md5", "sha256", "sha512")
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(UmbraError::Config(format!("Unknown checksum algorithm: {}", s))),
        }
    }

    /// Lowercase name, also the manifest file extension
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hexadecimal digest this algorithm produces
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

/// Coarse CPU-budget knob mapped to a worker count per pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadProfile {
    /// Single worker
    VeryLow,
    /// 25% of available CPUs
    Low,
    /// 50% of available CPUs
    Normal,
    /// 75% of available CPUs
    High,
    /// Every available CPU
    Insane,
}

impl Default for WorkloadProfile {
    fn default() -> Self {
        Self::Normal
    }
}

impl WorkloadProfile {
    /// Parse profile from string (e.g., "very-low", "normal", "insane")
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(' ', "-").as_str() {
            "very-low" => Ok(Self::VeryLow),
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "insane" => Ok(Self::Insane),
            _ => Err(UmbraError::Config(format!("Unknown workload profile: {}", s))),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

/// A user-designated input path with its skip flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEntry {
    /// Absolute path of the file or directory to back up
    pub path: PathBuf,

    /// Exclude this entry from the current run without removing it
    #[serde(default)]
    pub skip: bool,
}

impl InputEntry {
    pub fn new(path: impl Into<PathBuf>, skip: bool) -> Self {
        Self { path: path.into(), skip }
    }
}

/// Main configuration for backup and validation runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Ordered list of input entries
    #[serde(default)]
    pub input_paths: Vec<InputEntry>,

    /// Destination (backup) directory
    pub save_to: PathBuf,

    /// Treat symlinks as their targets during traversal and copy
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Delete mirror entries the inputs no longer track
    #[serde(default)]
    pub delete_data: bool,

    /// When deleting, also remove mirror entries covered by skipped inputs
    #[serde(default)]
    pub delete_skipped: bool,

    /// Recreate empty input directories inside the mirror
    #[serde(default)]
    pub create_empty_dirs: bool,

    /// Render a tree.txt sidecar after the backup
    #[serde(default)]
    pub generate_tree: bool,

    /// Digest algorithm for the manifest
    #[serde(default)]
    pub checksum_alg: ChecksumAlg,

    /// Worker-count budget for the pools
    #[serde(default)]
    pub workload_profile: WorkloadProfile,

    /// Recompute the final manifest from scratch instead of trusting the
    /// parsed one for unchanged files
    #[serde(default)]
    pub recalculate_checksum: bool,

    /// Log verbosity
    #[serde(default)]
    pub log_level: LogLevel,

    /// Optional log file (JSON lines); stdout when absent
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Force DEBUG level regardless of log_level
    #[serde(default)]
    pub verbose: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            input_paths: Vec::new(),
            save_to: PathBuf::new(),
            follow_symlinks: false,
            delete_data: false,
            delete_skipped: false,
            create_empty_dirs: false,
            generate_tree: false,
            checksum_alg: ChecksumAlg::default(),
            workload_profile: WorkloadProfile::default(),
            recalculate_checksum: false,
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
        }
    }
}

impl BackupConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| UmbraError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| UmbraError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Load configuration with fallback priority:
    /// 1. explicit path (when given)
    /// 2. ./umbra.toml (project-specific)
    /// 3. ~/.umbra/umbra.toml (user defaults)
    pub fn load_with_fallback(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = Path::new("umbra.toml");
        if local.exists() {
            return Self::load(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".umbra").join("umbra.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        Err(UmbraError::Config(
            "No configuration file found (looked for ./umbra.toml and ~/.umbra/umbra.toml)"
                .to_string(),
        ))
    }

    /// Path of the digest manifest inside the destination
    pub fn manifest_path(&self) -> PathBuf {
        self.save_to.join(format!("checksums.{}", self.checksum_alg.name()))
    }
}
