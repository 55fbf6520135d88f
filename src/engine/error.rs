//! Error taxonomy of the front-end boundary.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::backend::BackendError;
use crate::resolver::ResolveError;
use crate::security::SecurityRejection;
use crate::store::{Entity, StoreError};

/// Errors returned by [`Engine`](super::Engine) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input shape or value. Raised before any job exists.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A path, URL or file was refused by the security gate.
    #[error("rejected by security check: {0}")]
    Security(#[from] SecurityRejection),

    /// Disk, CPU, memory or I/O over threshold.
    #[error("resources exhausted: {0}\n  Suggestion: Free disk space or wait for running jobs to finish")]
    ResourceExhausted(String),

    /// A download, conversion or organize backend failed.
    #[error("backend failed: {0}")]
    Backend(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("storage failure: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Security(_) => ErrorCategory::Security,
            Self::ResourceExhausted(_) => ErrorCategory::ResourceExhausted,
            Self::Backend(_) => ErrorCategory::Backend,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Store(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Converts into the structured error handed to callers.
    ///
    /// Internal and storage errors are logged in full under the correlation
    /// id; the caller only sees a generic message carrying that id.
    #[must_use]
    pub fn to_client(&self) -> ClientError {
        let correlation_id = Uuid::new_v4().to_string();
        let category = self.category();
        let message = if category == ErrorCategory::Internal {
            error!(correlation_id = %correlation_id, error = %self, "internal engine error");
            format!("internal error, reference {correlation_id}")
        } else {
            self.to_string()
        };
        ClientError {
            category,
            message,
            correlation_id,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other),
        }
    }
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<ResolveError> for EngineError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoProvider { .. } => Self::Validation(err.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Caller-facing error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Security,
    ResourceExhausted,
    Backend,
    NotFound,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Security => "security",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Backend => "backend",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured error returned across the front-end boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientError {
    pub category: ErrorCategory,
    pub message: String,
    pub correlation_id: String,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}
