//! Error taxonomy shared by every layer.
//!
//! Each enum names one failure family. `ServiceError` is what the services
//! hand back to the transport layer, which maps the family to a status code.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no credential was presented")]
    MissingCredential,
    #[error("credential has expired")]
    Expired,
    #[error("credential is malformed")]
    Malformed,
    #[error("credential signature is invalid")]
    SignatureInvalid,
    /// Wrong password, unknown email, or an unknown/revoked refresh token.
    #[error("credential was not accepted")]
    InvalidCredential,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("conversation {0} not found")]
    Conversation(i64),
    #[error("user not found")]
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("email is already registered")]
    EmailTaken,
}

/// Reasons a generation attempt can fail. These never reach a caller as a
/// transport failure; they are rendered into an assistant turn instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("the generator did not respond within {0:?}")]
    Timeout(Duration),
    #[error("the generator failed: {0}")]
    ExternalFailure(String),
    #[error("the generator returned no usable text")]
    SanitizationFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("commit failed: {0}")]
    CommitFailure(String),
    /// The store could not undo a failed operation. Treated as fatal.
    #[error("rollback failed: {0}")]
    RollbackFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Hashing or signing failed. Not expected for well-formed input.
    #[error("internal error: {0}")]
    Internal(String),
}
