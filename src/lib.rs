/*!
 * Umbra - Incremental checksum-verified directory backup engine
 *
 * Provides mirror-style backups with features including:
 * - Parallel directory traversal, digesting, deletion and copying
 * - MD5 / SHA-256 / SHA-512 manifest generation and validation
 * - Incremental copies that skip files with matching digests
 * - Cooperative pause/resume/cancel across every worker pool
 * - Skip-aware deletion of entries the inputs no longer track
 * - Progress and status events for front-end consumption
 */

pub mod cli_progress;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod stats;

// Re-export commonly used types for convenience
pub use crate::config::{BackupConfig, ChecksumAlg, InputEntry, LogLevel, WorkloadProfile};
pub use crate::core::{
    Backupper, ControlBus, EngineEvent, EventPublisher, EventSubscriber, ExitCode,
};
pub use crate::error::{Result, UmbraError};
pub use crate::stats::BackupStats;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
