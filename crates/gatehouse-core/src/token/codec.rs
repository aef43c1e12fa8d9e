//! Signed, time-bounded identity tokens (JWT, HS256).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// Identity facts embedded in a token. Timestamps are seconds since the Unix
/// epoch and `exp > iat` always holds for claims produced by [`issue_at`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    pub fn username(&self) -> &str {
        &self.sub
    }
}

/// The identity part of [`Claims`], before timestamps are stamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsInput {
    pub username: String,
    pub email: String,
    pub role: String,
}

/// Current wall-clock time as a JWT numeric date.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Signs `input` with `secret`, valid for `ttl` from now.
pub fn issue(input: &ClaimsInput, secret: &str, ttl: Duration) -> Result<String, TokenError> {
    issue_at(input, secret, ttl, unix_now())
}

/// Deterministic form of [`issue`]: `now` becomes the `iat` claim.
///
/// Sub-second parts of `ttl` are dropped; a ttl under one second is rejected
/// because it could not satisfy `exp > iat`.
pub fn issue_at(
    input: &ClaimsInput,
    secret: &str,
    ttl: Duration,
    now: u64,
) -> Result<String, TokenError> {
    let ttl_secs = ttl.as_secs();
    if ttl_secs == 0 {
        return Err(TokenError::InvalidTtl);
    }

    let claims = Claims {
        sub: input.username.clone(),
        email: input.email.clone(),
        role: input.role.clone(),
        iat: now,
        exp: now.saturating_add(ttl_secs),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TokenError::Signing(e.to_string()))
}

/// Verifies `token` against `secret` and returns its claims.
pub fn verify(token: &str, secret: &str) -> Result<Claims, TokenError> {
    verify_at(token, secret, unix_now())
}

/// Deterministic form of [`verify`].
///
/// Expiry is checked before the signature, so an expired token reports
/// [`TokenError::Expired`] whether or not it was signed with `secret`.
pub fn verify_at(token: &str, secret: &str, now: u64) -> Result<Claims, TokenError> {
    let mut unchecked = validation();
    unchecked.insecure_disable_signature_validation();
    let parsed = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &unchecked)
        .map_err(classify)?
        .claims;

    if parsed.exp <= parsed.iat {
        return Err(TokenError::Malformed("exp must be after iat".to_string()));
    }
    if now > parsed.exp {
        return Err(TokenError::Expired);
    }

    let verified = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation(),
    )
    .map_err(classify)?;

    Ok(verified.claims)
}

// Expiry is checked by hand against the caller's `now`, with zero leeway.
fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.leeway = 0;
    validation
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed(err.to_string()),
    }
}
