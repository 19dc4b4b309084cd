//! Error types for the synchronization subsystem.

use thiserror::Error;

/// Errors that can occur while recording, building or publishing sync documents.
#[derive(Debug, Error)]
pub enum SyncError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip archive could not be written.
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A previously written document could not be parsed back.
    #[error("XML parse error: {msg}")]
    Xml {
        /// Error message describing the parse failure.
        msg: String,
    },

    /// The audit store rejected a read or write.
    #[error("audit store error: {msg}")]
    Audit {
        /// Error message describing the issue.
        msg: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The repository collaborator failed.
    #[error("repository error: {msg}")]
    Repository {
        /// Error message describing the issue.
        msg: String,
    },

    /// The metadata crosswalk failed for an item.
    #[error("metadata render failed for {handle} in format {prefix}: {msg}")]
    Render {
        /// Handle of the item being rendered.
        handle: String,
        /// Metadata format prefix.
        prefix: String,
        /// Error message from the renderer.
        msg: String,
    },

    /// No metadata format with this prefix is configured.
    #[error("unknown metadata format: {prefix}")]
    UnknownFormat {
        /// The requested format prefix.
        prefix: String,
    },

    /// A resource or scope could not be found.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing thing.
        what: String,
    },

    /// A timestamp did not match the filename timestamp format.
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp {
        /// The rejected input.
        value: String,
    },

    /// An incremental run was requested for a scope without a baseline.
    #[error("scope {scope} has not been initialized")]
    NotInitialized {
        /// The scope that has no change list yet.
        scope: String,
    },

    /// Another orchestrator run holds the output directory.
    #[error("output directory is locked by another run: {path}")]
    Locked {
        /// Path of the lock file.
        path: String,
    },

    /// Invalid settings.
    #[error("configuration error: {msg}")]
    Config {
        /// Error message describing the invalid setting.
        msg: String,
    },
}

impl From<quick_xml::Error> for SyncError {
    fn from(err: quick_xml::Error) -> Self {
        SyncError::Xml {
            msg: err.to_string(),
        }
    }
}

impl SyncError {
    /// Shorthand for a [`SyncError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        SyncError::NotFound { what: what.into() }
    }

    /// True if the error means the requested thing does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::NotFound { .. } | SyncError::UnknownFormat { .. }
        )
    }
}
