//! Error types for course-runner

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using course-runner's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for course-runner
///
/// A child that raises or exits non-zero is not an error here: its traceback is
/// ordinary stderr output and flows through the relay like any other line.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The interpreter could not be found or the process could not be spawned
    #[error("Failed to launch {}: {source}", interpreter.display())]
    Launch {
        interpreter: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every execution slot is taken
    #[error("Runner busy: {0}")]
    Busy(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a launch error for the given interpreter
    pub fn launch(interpreter: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Launch {
            interpreter: interpreter.into(),
            source,
        }
    }

    /// HTTP status this error is reported with
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Busy(_) => 503,
            Error::Config(_)
            | Error::Launch { .. }
            | Error::Json(_)
            | Error::Io(_)
            | Error::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_error_message() {
        let err = Error::launch(
            "/nope/python3",
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/nope/python3"));
        assert!(msg.contains("No such file"));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Busy("full".into()).status_code(), 503);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
        assert_eq!(Error::Config("bad port".into()).status_code(), 500);

        let json: Error = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(json, Error::Json(_)));
        assert_eq!(json.status_code(), 500);
    }
}
