/*!
 * Error types for Umbra
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, UmbraError>;

#[derive(Debug)]
pub enum UmbraError {
    /// Non-skipped input path does not exist
    SourceNotFound(PathBuf),

    /// Two non-skipped inputs normalize to the same leaf-relative key
    DuplicateInput(PathBuf),

    /// Invalid or empty path in configuration
    InvalidPath(String),

    /// Configuration error
    Config(String),

    /// I/O error
    Io(io::Error),

    /// Digest manifest required for validation is absent
    ManifestMissing(PathBuf),

    /// Worker pool error
    Pool(String),

    /// Run cancelled by user request
    Cancelled,
}

impl UmbraError {
    /// Check if this error aborts a run before any stage starts
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            UmbraError::SourceNotFound(_)
                | UmbraError::DuplicateInput(_)
                | UmbraError::InvalidPath(_)
                | UmbraError::Config(_)
        )
    }

    /// Check if this error is a user cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UmbraError::Cancelled)
    }
}

impl fmt::Display for UmbraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UmbraError::SourceNotFound(path) => {
                write!(f, "Input path not found and not skipped: {}", path.display())
            }
            UmbraError::DuplicateInput(path) => {
                write!(f, "Duplicated input path: {}", path.display())
            }
            UmbraError::InvalidPath(path) => {
                write!(f, "Invalid path: {}", path)
            }
            UmbraError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            UmbraError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            UmbraError::ManifestMissing(path) => {
                write!(f, "Checksum manifest not found: {}", path.display())
            }
            UmbraError::Pool(msg) => {
                write!(f, "Worker pool error: {}", msg)
            }
            UmbraError::Cancelled => {
                write!(f, "Cancelled by user request")
            }
        }
    }
}

impl std::error::Error for UmbraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UmbraError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for UmbraError {
    fn from(err: io::Error) -> Self {
        UmbraError::Io(err)
    }
}
