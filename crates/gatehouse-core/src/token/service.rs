//! Access/refresh token lifecycle.

use serde::Serialize;

use crate::config::settings::TokenConfig;
use crate::error::TokenError;
use crate::source::{UserRecord, UserSource};
use crate::status::{RpcResult, Status};
use crate::token::codec::{self, Claims, ClaimsInput};

/// A freshly issued access token and the refresh token that can renew it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues and verifies both token classes.
///
/// Access and refresh tokens are signed with different secrets, so neither
/// class verifies as the other.
#[derive(Debug, Clone)]
pub struct TokenService {
    config: TokenConfig,
}

impl TokenService {
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    pub fn issue_access(&self, user: &UserRecord) -> Result<String, TokenError> {
        codec::issue(
            &ClaimsInput::from(user),
            &self.config.access_secret,
            self.config.access_ttl(),
        )
    }

    pub fn issue_refresh(&self, user: &UserRecord) -> Result<String, TokenError> {
        codec::issue(
            &ClaimsInput::from(user),
            &self.config.refresh_secret,
            self.config.refresh_ttl(),
        )
    }

    pub fn issue_pair(&self, user: &UserRecord) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access(user)?,
            refresh_token: self.issue_refresh(user)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        codec::verify(token, &self.config.access_secret)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        codec::verify(token, &self.config.refresh_secret)
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// The subject is looked up again so a deleted account stops being able
    /// to mint access tokens even though its refresh token still verifies.
    /// The new token carries the user's *current* email and role.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` if the refresh token does not verify.
    /// - `NotFound` if the subject no longer exists.
    /// - `Internal` if the user source is unreachable or signing fails.
    pub async fn redeem_refresh(
        &self,
        refresh_token: &str,
        users: &dyn UserSource,
    ) -> RpcResult<String> {
        let user = self.current_user(refresh_token, users).await?;
        self.issue_access(&user).map_err(signing_failed)
    }

    /// Exchanges a refresh token for a new refresh token, with the same
    /// checks as [`TokenService::redeem_refresh`].
    pub async fn renew_refresh(
        &self,
        refresh_token: &str,
        users: &dyn UserSource,
    ) -> RpcResult<String> {
        let user = self.current_user(refresh_token, users).await?;
        self.issue_refresh(&user).map_err(signing_failed)
    }

    async fn current_user(
        &self,
        refresh_token: &str,
        users: &dyn UserSource,
    ) -> RpcResult<UserRecord> {
        let claims = self.verify_refresh(refresh_token).map_err(|e| {
            tracing::debug!(error = %e, "refresh token rejected");
            Status::unauthenticated("invalid refresh token")
        })?;

        match users.get(claims.username()).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => {
                tracing::info!(username = %claims.sub, "refresh token for unknown user");
                Err(Status::not_found(format!("user {} not found", claims.sub)))
            }
            Err(e) => {
                tracing::error!(error = %e, "user lookup failed during refresh");
                Err(Status::internal("failed to load user"))
            }
        }
    }
}

fn signing_failed(err: TokenError) -> Status {
    tracing::error!(error = %err, "token signing failed");
    Status::internal("failed to generate token")
}
