//! SpecStore error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or mutating spec files
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Spec file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Backup not found: {id}")]
    BackupNotFound { id: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid backup pattern for {path}: {message}")]
    Pattern { path: PathBuf, message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound { path };
        }
        Self::Io { path, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_mapped_from_io_kind() {
        let err = StoreError::io(
            "/tmp/missing.js",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(err.to_string().contains("/tmp/missing.js"));
    }

    #[test]
    fn test_other_io_errors_keep_source() {
        let err = StoreError::io(
            "/tmp/locked.js",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(err.to_string().contains("denied"));
    }
}
