//! Storage error types for the document store abstraction.

use std::fmt;

/// Errors that can occur during document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested document was not found.
    #[error("Document not found: {collection}/{key}")]
    NotFound {
        /// Collection that was searched.
        collection: String,
        /// Lookup key (usually the slug).
        key: String,
    },

    /// A document with the same unique key already exists.
    #[error("Document already exists: {collection}/{key}")]
    AlreadyExists {
        /// Collection the insert targeted.
        collection: String,
        /// The duplicated unique key.
        key: String,
    },

    /// The document is malformed (not an object, missing the unique key, ...).
    #[error("Invalid document: {message}")]
    InvalidDocument {
        /// Description of why the document is invalid.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Creates a new `InvalidDocument` error.
    #[must_use]
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is an already exists error.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::InvalidDocument { .. } => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Validation,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
