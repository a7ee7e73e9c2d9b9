//! Error types for dataset loading and model assembly.
//!
//! Loaders assume a clean, fully-formed dataset: any violation is a
//! precondition failure that aborts the load call. There is no retry and no
//! partial recovery.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for adaptar operations.
pub type Result<T> = std::result::Result<T, AdaptarError>;

/// Errors that can occur while loading datasets or assembling models.
#[derive(Error, Debug)]
pub enum AdaptarError {
    /// An input file could not be parsed in its expected format.
    #[error("unparsable input {path}: {message}")]
    Format { path: PathBuf, message: String },

    /// A tensor dimension or count violated an expected invariant.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A required named domain file was not found among the scanned files.
    #[error("domain file not found: {name} (scanned {dir})")]
    MissingDomain { name: String, dir: PathBuf },

    /// A dataset variant that is explicitly not implemented.
    #[error("unsupported dataset variant: {0}")]
    Unsupported(String),

    /// IO error with context.
    #[error("io error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl AdaptarError {
    /// Create a format error for a given file.
    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format { path: path.into(), message: message.into() }
    }

    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_display() {
        let err = AdaptarError::format("data/trace.csv", "row 3: not numeric");
        let msg = err.to_string();
        assert!(msg.contains("trace.csv"));
        assert!(msg.contains("row 3"));
    }

    #[test]
    fn test_missing_domain_display() {
        let err = AdaptarError::MissingDomain {
            name: "ihs95".to_string(),
            dir: "datasets/smarthome".into(),
        };
        assert!(err.to_string().contains("ihs95"));
    }

    #[test]
    fn test_io_error_keeps_context() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = AdaptarError::io("reading folds.json", io);
        assert!(err.to_string().contains("folds.json"));
    }
}
