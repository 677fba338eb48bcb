//! Error types for quire operations.
//!
//! Every backend surfaces the same error hierarchy so that callers never
//! branch on which store produced a failure. Each variant carries a structured
//! [`ErrorCode`] for programmatic handling.

use thiserror::Error;

/// Result type alias for quire operations.
pub type QuireResult<T> = Result<T, QuireError>;

/// Main error type for all quire operations.
#[derive(Error, Debug)]
pub enum QuireError {
    /// A key resolved to nothing in the targeted backend.
    #[error("Entity not found: {message}")]
    NotFound {
        message: String,
        code: ErrorCode,
        key: Option<String>,
    },

    /// An insert collided with an existing primary identity.
    #[error("Constraint violation: {message}")]
    Constraint {
        message: String,
        code: ErrorCode,
        key: Option<String>,
    },

    /// Replayed history could not be reconciled with the relational parent.
    #[error("Consistency error: {message}")]
    Consistency {
        message: String,
        code: ErrorCode,
        fields: Vec<String>,
    },

    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation { message: String, code: ErrorCode },

    /// A key could not be converted for the requested entity kind.
    #[error("Invalid key: {message}")]
    InvalidKey { message: String, code: ErrorCode },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Keys (KEY_xxx)
    KeyNotFound,
    KeyInvalid,
    KeyKindMismatch,

    // Constraints (CON_xxx)
    ConDuplicate,

    // Consistency (CST_xxx)
    CstReplayMismatch,
    CstParentMissing,
    CstParityMismatch,

    // Validation (VAL_xxx)
    ValMissingField,
    ValInvalidInput,
    ValReadOnly,

    // Database (DB_xxx)
    DbConnectionFailed,
    DbOperationFailed,
    DbCorrupted,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::KeyNotFound => "KEY_001",
            ErrorCode::KeyInvalid => "KEY_002",
            ErrorCode::KeyKindMismatch => "KEY_003",
            ErrorCode::ConDuplicate => "CON_001",
            ErrorCode::CstReplayMismatch => "CST_001",
            ErrorCode::CstParentMissing => "CST_002",
            ErrorCode::CstParityMismatch => "CST_003",
            ErrorCode::ValMissingField => "VAL_001",
            ErrorCode::ValInvalidInput => "VAL_002",
            ErrorCode::ValReadOnly => "VAL_003",
            ErrorCode::DbConnectionFailed => "DB_001",
            ErrorCode::DbOperationFailed => "DB_002",
            ErrorCode::DbCorrupted => "DB_003",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl QuireError {
    /// Create a not found error for the given key description.
    pub fn not_found(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::NotFound {
            message: format!("No entity found for key {}", key),
            code: ErrorCode::KeyNotFound,
            key: Some(key),
        }
    }

    /// Create a duplicate-identity error.
    pub fn constraint(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::Constraint {
            message: format!("Entity with key {} already exists", key),
            code: ErrorCode::ConDuplicate,
            key: Some(key),
        }
    }

    /// Create a consistency error.
    pub fn consistency(message: impl Into<String>, code: ErrorCode) -> Self {
        Self::Consistency {
            message: message.into(),
            code,
            fields: Vec::new(),
        }
    }

    /// Create a consistency error listing the fields that disagree.
    pub fn field_mismatch(message: impl Into<String>, fields: Vec<String>) -> Self {
        Self::Consistency {
            message: message.into(),
            code: ErrorCode::CstParityMismatch,
            fields,
        }
    }

    /// Create a validation error for a missing required field.
    pub fn missing_field(field: &str) -> Self {
        Self::Validation {
            message: format!("Required field '{}' is not set", field),
            code: ErrorCode::ValMissingField,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
        }
    }

    /// Create a read-only rejection.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValReadOnly,
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
            code: ErrorCode::KeyInvalid,
        }
    }

    /// Create a key kind mismatch error.
    pub fn kind_mismatch(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
            code: ErrorCode::KeyKindMismatch,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create a corrupted-row error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbCorrupted,
            source: None,
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { code, .. } => *code,
            Self::Constraint { code, .. } => *code,
            Self::Consistency { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::InvalidKey { code, .. } => *code,
            Self::Database { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether this error is a missing-entity failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is a duplicate-identity failure.
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint { .. })
    }

    /// Get a suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::NotFound { .. } => {
                Some("Check that the entity was written to the backend being read")
            }
            Self::Constraint { .. } => Some("Use put() to replace an existing entity"),
            Self::Consistency { .. } => {
                Some("Inspect the history entry and its relational parent before replaying again")
            }
            Self::Validation {
                code: ErrorCode::ValReadOnly,
                ..
            } => Some("Writes are disabled in the current migration state"),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for QuireError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}
