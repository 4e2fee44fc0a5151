//! The discriminated error taxonomy from which HTTP status codes are
//! derived.
//!
//! Handlers build `anyhow::Error` chains with `.context(...)` as they
//! propagate a failure upward; the outermost extractor downcasts to
//! `SmartError` when the root cause is one of these variants and otherwise
//! reports [`SmartError::Internal`]. This mirrors the split the teacher
//! keeps between `mz-sql`'s `anyhow`-based planner errors and `mz-pgwire`'s
//! wire-level error codes.

use thiserror::Error;

/// A caller-facing error with a known HTTP status code.
#[derive(Debug, Error)]
pub enum SmartError {
    /// A caller-supplied field failed schema or semantic validation.
    #[error("{0}")]
    BadRequest(String),
    /// The authenticated identity lacks the entitlement for this action, or
    /// a devlxd `security.devlxd*` flag is disabled.
    #[error("{0}")]
    Forbidden(String),
    /// The resource does not exist, or exists in a project the caller
    /// cannot see.
    #[error("{0}")]
    NotFound(String),
    /// An `If-Match` precondition failed.
    #[error("etag mismatch")]
    PreconditionFailed,
    /// A unique-constraint violation was lifted from the KV store.
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// The endpoint matched but the method is not wired up.
    #[error("not implemented")]
    NotImplemented,
    /// Any other failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SmartError {
    /// The HTTP status code this error renders as.
    pub fn status_code(&self) -> u16 {
        match self {
            SmartError::BadRequest(_) => 400,
            SmartError::Forbidden(_) => 403,
            SmartError::NotFound(_) => 404,
            SmartError::PreconditionFailed => 412,
            SmartError::AlreadyExists(_) => 409,
            SmartError::Internal(_) => 500,
            SmartError::NotImplemented => 501,
        }
    }

    /// A short, stable discriminant used by the operation error
    /// categorization in the operations framework (`not-found`,
    /// `not-authorized`, `already-exists`, `constraint-unique`).
    pub fn category(&self) -> &'static str {
        match self {
            SmartError::BadRequest(_) => "bad-request",
            SmartError::Forbidden(_) => "not-authorized",
            SmartError::NotFound(_) => "not-found",
            SmartError::PreconditionFailed => "precondition-failed",
            SmartError::AlreadyExists(_) => "already-exists",
            SmartError::Internal(_) => "internal",
            SmartError::NotImplemented => "not-implemented",
        }
    }
}

/// Best-effort extraction of a [`SmartError`] from an arbitrary
/// `anyhow::Error` chain, falling back to [`SmartError::Internal`].
///
/// `anyhow::Error` does not implement `Clone`, so callers that need to keep
/// the original error for logging while also categorizing it should call
/// this on a reference via [`anyhow::Error::downcast_ref`].
pub fn categorize(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<SmartError>() {
        Some(e) => e.category(),
        None => "internal",
    }
}
