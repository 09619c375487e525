//! Engine-wide error taxonomy.
//!
//! DESIGN
//! ======
//! One enum covers every failure a handler can surface to a caller:
//! validation, permission, not-found, and transient storage failures.
//! Validation/permission/not-found errors go to the caller only and are
//! never broadcast. Storage failures are logged at the call site and
//! surfaced as a generic retryable failure; retries belong to the storage
//! collaborator, not this layer.

use crate::frame::ErrorCode;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad id, out-of-range coordinates, missing or malformed field.
    #[error("{0}")]
    Validation(String),

    /// Mode-gated command, missing access secret, insufficient role.
    #[error("{0}")]
    Permission(String),

    /// Unknown board, cell, or notification.
    #[error("{0} not found")]
    NotFound(String),

    /// Storage I/O failure. Surfaced generically, never broadcast.
    #[error("storage failure")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl ErrorCode for EngineError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Permission(_) => "E_PERMISSION",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Store(_) => "E_STORE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
