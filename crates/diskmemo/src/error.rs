//! Error types for the disk cache

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Boxed error produced by a user computation or sequence producer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for disk cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(diskmemo::cache::io),
        help("Check file permissions and ensure the cache root exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create_dir")
        operation: String,
    },

    /// Invalid limits, tag suffix or root location
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(diskmemo::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Descriptor record or payload could not be encoded or decoded
    #[error("Serialization error: {message}")]
    #[diagnostic(code(diskmemo::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// The user computation (or its sequence producer) failed.
    ///
    /// The pending instance has already been rolled back. The original error is
    /// kept untouched in `source` and can be recovered with
    /// [`Error::into_computation_error`].
    #[error("Computation failed: {source}")]
    #[diagnostic(code(diskmemo::cache::computation))]
    Computation {
        /// The error raised by the computation
        #[source]
        source: BoxError,
    },

    /// The computation was interrupted through a [`crate::CancelToken`]
    #[error("Computation of cache instance '{id}' was cancelled")]
    #[diagnostic(
        code(diskmemo::cache::cancelled),
        help("Intermediate results were removed; the next call recomputes")
    )]
    Cancelled {
        /// Id of the instance that was rolled back
        id: String,
    },

    /// A sequence store does not hold exactly the keys `0..N`
    #[error("Corrupt sequence store at {}: {message}", path.display())]
    #[diagnostic(
        code(diskmemo::cache::corrupt_store),
        help("The cache instance was built incorrectly; delete it and recompute")
    )]
    CorruptStore {
        /// Path of the store file
        path: PathBuf,
        /// What is wrong with the store
        message: String,
    },

    /// A committed instance does not carry a readable payload
    #[error("Cache instance at {} has no payload", path.display())]
    #[diagnostic(code(diskmemo::cache::missing_payload))]
    MissingPayload {
        /// Instance directory
        path: PathBuf,
    },

    /// Generated instance id collides with an existing directory
    #[error("Cache instance directory {} already exists", path.display())]
    #[diagnostic(
        code(diskmemo::cache::allocation),
        help("Instance ids contain a random component; a collision indicates a bug")
    )]
    Allocation {
        /// The colliding directory
        path: PathBuf,
    },

    /// Index outside `[-len, len - 1]`
    #[error("Index {index} out of bounds (len={len})")]
    #[diagnostic(code(diskmemo::cache::index_out_of_range))]
    IndexOutOfRange {
        /// The requested index
        index: isize,
        /// Length of the collection
        len: usize,
    },

    /// Entry requested after the backing store was released
    #[error("Sequence store at {} was already released", path.display())]
    #[diagnostic(code(diskmemo::cache::store_released))]
    StoreReleased {
        /// Path of the store file
        path: PathBuf,
    },

    /// Some instance directories could not be removed while clearing a root
    #[error("Failed to remove {} cache instance(s)", failed.len())]
    #[diagnostic(code(diskmemo::cache::clear_incomplete))]
    ClearIncomplete {
        /// Directories that are still present
        failed: Vec<PathBuf>,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Wrap an error raised by user code
    #[must_use]
    pub fn computation(source: impl Into<BoxError>) -> Self {
        Self::Computation {
            source: source.into(),
        }
    }

    /// Create a corrupt store error
    #[must_use]
    pub fn corrupt_store(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::CorruptStore {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Whether this error came from the user computation
    #[must_use]
    pub fn is_computation(&self) -> bool {
        matches!(self, Self::Computation { .. })
    }

    /// Recover the original error raised by the computation, if any
    #[must_use]
    pub fn into_computation_error(self) -> Option<BoxError> {
        match self {
            Self::Computation { source } => Some(source),
            _ => None,
        }
    }
}

/// Result type for disk cache operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("simulation diverged")]
    struct Diverged;

    #[test]
    fn test_io_error_mentions_path() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "/cache/root",
            "read_dir",
        );
        let msg = err.to_string();
        assert!(msg.contains("read_dir"));
        assert!(msg.contains("/cache/root"));
    }

    #[test]
    fn test_computation_error_is_recoverable_unchanged() {
        let err = Error::computation(Diverged);
        assert!(err.is_computation());
        let source = err.into_computation_error().unwrap();
        assert!(source.downcast_ref::<Diverged>().is_some());
    }

    #[test]
    fn test_non_computation_errors_have_no_source_to_recover() {
        let err = Error::configuration("bad limit");
        assert!(!err.is_computation());
        assert!(err.into_computation_error().is_none());
    }

    #[test]
    fn test_index_error_formats_bounds() {
        let err = Error::IndexOutOfRange { index: -4, len: 3 };
        assert_eq!(err.to_string(), "Index -4 out of bounds (len=3)");
    }
}
