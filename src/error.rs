//! The closed error taxonomy (spec.md §6.2). Components surface their own
//! kinds unchanged; the Command Router is the only place that redacts
//! infrastructure detail before it reaches a caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidInput,
    InvalidCredentials,
    AccountLocked,
    TokenExpired,
    TokenInvalid,
    RoleMismatch,
    Forbidden,
    SemaphoreUnavailable,
    SemaphoreNotHeld,
    WriterDisabled,
    NotFound,
    StoreError,
    Timeout,
    RateLimited,
    Internal,
}

impl ErrorKind {
    /// Retryable kinds per §6.2 — the envelope carries a `retry_after` hint.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::SemaphoreUnavailable | ErrorKind::RateLimited)
    }
}

#[derive(Debug, Error, Clone)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after: Option<u64>,
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Shared pagination bounds (spec.md §6.1): `page ∈ [1,1000]`, `limit ∈
/// [1,100]`, used by every list-shaped operation (messages, audit log).
pub fn validate_pagination(page: u64, limit: u64) -> CoreResult<()> {
    if !(1..=1000).contains(&page) {
        return Err(CoreError::invalid_input("page must be between 1 and 1000"));
    }
    if !(1..=100).contains(&limit) {
        return Err(CoreError::invalid_input("limit must be between 1 and 100"));
    }
    Ok(())
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), retry_after: None }
    }

    pub fn with_retry(kind: ErrorKind, message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self { kind, message: message.into(), retry_after: Some(retry_after_secs) }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn invalid_credentials() -> Self {
        Self::new(ErrorKind::InvalidCredentials, "invalid username or password")
    }

    pub fn account_locked(retry_after_secs: u64) -> Self {
        Self::with_retry(ErrorKind::AccountLocked, "account is temporarily locked", retry_after_secs)
    }

    pub fn token_expired() -> Self {
        Self::new(ErrorKind::TokenExpired, "session token has expired")
    }

    pub fn token_invalid(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::TokenInvalid, detail)
    }

    pub fn role_mismatch() -> Self {
        Self::new(ErrorKind::RoleMismatch, "token role no longer matches the account")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn semaphore_unavailable(holder: &str) -> Self {
        Self::with_retry(
            ErrorKind::SemaphoreUnavailable,
            format!("writer lock is held by {holder}"),
            1,
        )
    }

    pub fn semaphore_not_held() -> Self {
        Self::new(ErrorKind::SemaphoreNotHeld, "caller does not hold the writer lock")
    }

    pub fn writer_disabled() -> Self {
        Self::new(ErrorKind::WriterDisabled, "writer lock acquisition is disabled")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn store_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}
