//! Error types for `gatehouse-core`.
//!
//! These are the internal failure types of the individual components. The
//! interceptor stages translate them into an RPC [`Status`](crate::Status)
//! at their own boundary; callers never see them directly.

/// Failure while issuing or verifying a signed token.
///
/// The variants are only distinguished in internal diagnostics. The
/// authentication stage collapses all of them into one `Unauthenticated`
/// status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// `now` is past the token's `exp` claim.
    #[error("token expired")]
    Expired,

    /// The token could not be parsed as a signed claim set.
    #[error("token malformed: {0}")]
    Malformed(String),

    /// The signature does not match the secret it was checked against.
    #[error("token signature mismatch")]
    BadSignature,

    /// A token was requested with a zero lifetime.
    #[error("token ttl must be at least one second")]
    InvalidTtl,

    /// The signing backend rejected the claims.
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// A backing collaborator (user or policy storage) could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("source unavailable: {0}")]
pub struct SourceError(pub String);

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure of the access policy cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The initial load of the rule set failed. Nothing was cached.
    #[error("access policy load failed: {0}")]
    Load(#[from] SourceError),
}

/// Invalid or unparsable configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The TOML text could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),

    /// A value parsed but is outside its allowed range.
    #[error("invalid config: {0}")]
    Invalid(String),
}
