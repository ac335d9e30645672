//! Error types for the media sorter

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media sorter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the media sorter
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source directory {path} cannot be read: {source}")]
    SourceRootUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Date {year}-{month:02} of {path} is outside the accepted range")]
    InvalidDate { path: PathBuf, year: i32, month: u32 },

    #[error("Failed to move {from} to {to}: {source}")]
    MoveFailure {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to persist checkpoint {path}: {message}")]
    CheckpointWrite { path: PathBuf, message: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Failed to read EXIF data from {path}: {message}")]
    ExifRead { path: PathBuf, message: String },

    #[error("Cannot derive a free name for {path}")]
    NameExhausted { path: PathBuf },

    #[error("Failed to install termination handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// A fatal error after work began; carries the counters reached so far
    #[error("Session aborted: {source}")]
    Aborted {
        source: Box<Error>,
        report: Box<crate::process::SessionReport>,
    },
}

impl Error {
    /// Whether this error stops the whole session rather than a single file
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SourceRootUnreadable { .. }
                | Error::CheckpointWrite { .. }
                | Error::Checkpoint(_)
                | Error::Signal(_)
                | Error::Aborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = Error::CheckpointWrite {
            path: PathBuf::from("/tmp/run.json"),
            message: "disk full".into(),
        };
        assert!(err.is_fatal());

        let err = Error::MoveFailure {
            from: PathBuf::from("/a.jpg"),
            to: PathBuf::from("/b/a.jpg"),
            source: std::io::Error::other("denied"),
        };
        assert!(!err.is_fatal());

        let err = Error::InvalidDate {
            path: PathBuf::from("/old.jpg"),
            year: 1970,
            month: 1,
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("1970-01"));
    }
}
