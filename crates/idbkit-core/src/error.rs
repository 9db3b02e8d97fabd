//! Error types for engines and databases

use std::fmt;

use thiserror::Error;

/// Result type for engine requests
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Classification of engine failures.
///
/// Variants mirror the exception names IndexedDB reports, so a browser
/// engine can map a `DOMException` by name and the in-memory engine can
/// report the same kinds for the same situations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// Uniqueness violated (duplicate primary key or unique index value)
    Constraint,
    /// Store or index does not exist
    NotFound,
    /// Connection closed, or request issued in the wrong state
    InvalidState,
    /// Requested version lower than the stored one
    Version,
    /// Value is not a valid key, or record has no usable key
    Data,
    /// Write attempted in a read-only transaction
    ReadOnly,
    /// Transaction aborted (including failed upgrades)
    Abort,
    /// Open blocked by connections that did not close on version change
    Blocked,
    /// Storage quota exhausted
    QuotaExceeded,
    /// No engine available in this environment
    NotAvailable,
    /// Anything the engine did not classify
    Unknown,
}

impl EngineErrorKind {
    /// Map an engine exception name (e.g. `"ConstraintError"`) to a kind.
    pub fn from_name(name: &str) -> Self {
        match name {
            "ConstraintError" => Self::Constraint,
            "NotFoundError" => Self::NotFound,
            "InvalidStateError" | "TransactionInactiveError" => Self::InvalidState,
            "VersionError" => Self::Version,
            "DataError" | "DataCloneError" => Self::Data,
            "ReadOnlyError" => Self::ReadOnly,
            "AbortError" => Self::Abort,
            "Blocked" => Self::Blocked,
            "QuotaExceededError" => Self::QuotaExceeded,
            "NotAvailable" => Self::NotAvailable,
            _ => Self::Unknown,
        }
    }

    /// The exception name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Constraint => "ConstraintError",
            Self::NotFound => "NotFoundError",
            Self::InvalidState => "InvalidStateError",
            Self::Version => "VersionError",
            Self::Data => "DataError",
            Self::ReadOnly => "ReadOnlyError",
            Self::Abort => "AbortError",
            Self::Blocked => "Blocked",
            Self::QuotaExceeded => "QuotaExceededError",
            Self::NotAvailable => "NotAvailable",
            Self::Unknown => "UnknownError",
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failure reported by the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Constraint, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::NotFound, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::InvalidState, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Data, message)
    }
}

/// Errors surfaced by [`Database`](crate::Database) and store handles.
///
/// `Clone` because a failed open is stored once and handed to every
/// operation awaiting the same connection.
#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    /// Schema descriptors cannot produce a target version
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Database failed to open or upgrade; permanent for the instance
    #[error("database open failed: {0}")]
    Open(EngineError),

    /// A single request failed
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// Record could not be converted to or from JSON
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Engine error kind behind this failure, if any.
    pub fn engine_kind(&self) -> Option<EngineErrorKind> {
        match self {
            DatabaseError::Open(e) | DatabaseError::Engine(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}
