//! Error types shared by the locator, providers, searches and jobs.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    /// The string is not of the form `scheme://[authority][/path][?query]`.
    #[error("malformed locator {locator:?}: {reason}")]
    MalformedLocator { locator: String, reason: String },

    /// No provider is registered for the scheme.
    #[error("unknown scheme: {0}")]
    UnknownScheme(String),

    /// I/O failure while reading, listing or writing a resource.
    #[error("cannot access {locator}: {source}")]
    ResourceAccess {
        locator: String,
        #[source]
        source: io::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Destination exists and the collision policy left the decision open.
    #[error("destination {destination} already exists (source {source_locator})")]
    Collision {
        source_locator: String,
        destination: String,
    },

    /// The self-update warm phase could not keep a resource resident.
    #[error("cannot preload {resource}: {reason}")]
    ClassLoad { resource: String, reason: String },

    /// A search option in the locator query has an unusable value.
    #[error("invalid value {value:?} for query option {key}: {reason}")]
    InvalidQuery {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{operation} is not supported by {locator}")]
    Unsupported {
        operation: &'static str,
        locator: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl VfsError {
    pub fn malformed(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedLocator {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    pub fn access(locator: impl ToString, source: io::Error) -> Self {
        Self::ResourceAccess {
            locator: locator.to_string(),
            source,
        }
    }

    pub fn not_found(locator: impl ToString) -> Self {
        Self::NotFound(locator.to_string())
    }

    pub fn not_a_directory(locator: impl ToString) -> Self {
        Self::NotADirectory(locator.to_string())
    }

    pub fn unsupported(operation: &'static str, locator: impl ToString) -> Self {
        Self::Unsupported {
            operation,
            locator: locator.to_string(),
        }
    }

    pub fn invalid_query(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Maps an `io::Error` to the closest variant, keeping the locator for context.
    pub fn from_io(locator: impl ToString, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(locator.to_string()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(locator.to_string()),
            _ => Self::access(locator, error),
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
