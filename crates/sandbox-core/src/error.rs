//! Error types for sandbox setup and supervision

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that prevent a sandbox from being built or supervised.
///
/// Timeouts, OOM kills, signals and non-zero exits are not errors: they are
/// reported through the execution result.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Precondition failed for {}: {reason}", path.display())]
    Precondition { path: PathBuf, reason: String },

    #[error("Conflicting file descriptor options: {0}")]
    FdConflict(String),

    #[error("Syscall error: {0}")]
    Syscall(String),

    #[error("Cgroup error: {0}")]
    Cgroup(String),

    #[error("Namespace error: {0}")]
    Namespace(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),
}

impl SandboxError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SandboxError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn precondition(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SandboxError::Precondition {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let sandbox_err = SandboxError::from(io_err);
        assert!(sandbox_err.to_string().contains("IO error"));
    }

    #[test]
    fn test_invalid_config_names_field() {
        let err = SandboxError::invalid_config("limits.time_ms", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for `limits.time_ms`: must be greater than 0"
        );
    }

    #[test]
    fn test_precondition_names_path() {
        let err = SandboxError::precondition("/srv/work", "directory is not empty");
        assert!(err.to_string().contains("/srv/work"));
        assert!(err.to_string().contains("not empty"));
    }

    #[test]
    fn test_open_error_keeps_source() {
        let err = SandboxError::Open {
            path: PathBuf::from("/nope"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("/nope"));
    }
}
