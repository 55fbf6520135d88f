//! Error types for store operations.

use std::fmt;

use thiserror::Error;

/// Coarse class of a database failure, kept alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// Another connection held the lock past the busy timeout.
    BusyOrLocked,
    /// A CHECK, UNIQUE or foreign-key constraint rejected the write.
    ConstraintViolation,
    /// The pool is closed, exhausted or the file is unreadable.
    Unavailable,
    Other,
}

impl DbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable
            }
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() {
                    Self::ConstraintViolation
                } else if db.message().contains("database is locked") {
                    Self::BusyOrLocked
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusyOrLocked => "locked",
            Self::ConstraintViolation => "constraint",
            Self::Unavailable => "unavailable",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity kinds named in not-found errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Media,
    Job,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Media => "media",
            Self::Job => "job",
        })
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error ({kind}): {message}")]
    Database { kind: DbErrorKind, message: String },

    /// No row with that id.
    #[error("{entity} not found: id {id}\n  Suggestion: The record may have been cleaned up or the ID is incorrect")]
    NotFound {
        entity: Entity,
        id: String,
    },

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt {entity} row {id}: {reason}")]
    Corrupt {
        entity: Entity,
        id: String,
        reason: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: DbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    #[must_use]
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn corrupt(entity: Entity, id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Corrupt {
            entity,
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn database_kind(&self) -> Option<DbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::NotFound { .. } | Self::Corrupt { .. } => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
