//! RPC status model returned to callers.
//!
//! Every rejection produced by an interceptor stage, and every error a
//! handler returns, is a [`Status`]: one [`Code`] plus a human-readable
//! message. Handler statuses pass through the chain untouched.

use std::fmt;

use serde::Serialize;

/// Outbound RPC error code. A subset of the gRPC canonical codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Unimplemented,
    Unauthenticated,
    PermissionDenied,
    ResourceExhausted,
    Unavailable,
    DeadlineExceeded,
    Cancelled,
    Internal,
}

/// Coarse classification of a [`Code`], used to decide who can recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing, malformed or expired credential. Re-authenticate.
    Authentication,
    /// Valid identity without the required role.
    Authorization,
    /// Rate limit or open breaker. Retry later with backoff.
    Admission,
    /// Policy or storage unreachable.
    Upstream,
    /// The request itself was wrong (bad body, unknown subject, ...).
    Caller,
    /// The call ran out of time or was abandoned.
    Interrupted,
}

impl Code {
    pub fn as_str(self) -> &'static str {
        match self {
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Unauthenticated => "UNAUTHENTICATED",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::Unavailable => "UNAVAILABLE",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::Cancelled => "CANCELLED",
            Code::Internal => "INTERNAL",
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            Code::Unauthenticated => ErrorClass::Authentication,
            Code::PermissionDenied => ErrorClass::Authorization,
            Code::ResourceExhausted | Code::Unavailable => ErrorClass::Admission,
            Code::Internal => ErrorClass::Upstream,
            Code::InvalidArgument | Code::NotFound | Code::AlreadyExists | Code::Unimplemented => {
                ErrorClass::Caller
            }
            Code::DeadlineExceeded | Code::Cancelled => ErrorClass::Interrupted,
        }
    }

    /// Returns `true` if the same request may succeed when retried later.
    pub fn is_retryable(self) -> bool {
        self.class() == ErrorClass::Admission
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RPC error: code plus caller-facing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }
}

/// Convenience alias used by stages and handlers.
pub type RpcResult<T> = Result<T, Status>;
