use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::{Call, Handler, Reply, RpcResult, Status, TokenService, UserRecord};

use super::{decode, reply};
use crate::auth::password;
use crate::dto::{
    AccessTokenResponse, CredentialsRequest, RefreshTokenRequest, RefreshTokenResponse,
    TokenPairResponse,
};
use crate::error::internal;
use crate::store::UserStore;

pub const GET_REFRESH_TOKEN: &str = "/auth_v1.AuthV1/GetRefreshToken";
pub const GET_ACCESS_TOKEN: &str = "/auth_v1.AuthV1/GetAccessToken";
pub const RENEW_REFRESH_TOKEN: &str = "/auth_v1.AuthV1/RenewRefreshToken";
pub const LOGIN: &str = "/auth_v1.AuthV1/Login";

/// Checks a username/password pair against the store.
async fn authenticate(users: &UserStore, creds: CredentialsRequest) -> RpcResult<UserRecord> {
    let Some(user) = users.find(&creds.username) else {
        tracing::warn!("Failed login attempt for unknown user: {}", creds.username);
        return Err(Status::unauthenticated("invalid credentials"));
    };

    let valid = password::verify_password_blocking(user.password_hash, creds.password)
        .await
        .map_err(internal)?;
    if !valid {
        tracing::warn!("Failed login attempt for user: {}", creds.username);
        return Err(Status::unauthenticated("invalid credentials"));
    }

    tracing::info!("Password verified successfully for user: {}", creds.username);
    Ok(user.record)
}

/// Username/password → refresh token.
pub struct GetRefreshToken {
    pub users: Arc<UserStore>,
    pub tokens: Arc<TokenService>,
}

#[async_trait]
impl Handler for GetRefreshToken {
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        let user = authenticate(&self.users, decode(call.body)?).await?;
        let refresh_token = self.tokens.issue_refresh(&user).map_err(internal)?;
        reply(&RefreshTokenResponse { refresh_token })
    }
}

/// Username/password → access and refresh token together.
pub struct Login {
    pub users: Arc<UserStore>,
    pub tokens: Arc<TokenService>,
}

#[async_trait]
impl Handler for Login {
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        let user = authenticate(&self.users, decode(call.body)?).await?;
        let pair = self.tokens.issue_pair(&user).map_err(internal)?;
        reply(&TokenPairResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }
}

/// Refresh token → access token for the user's current record.
pub struct GetAccessToken {
    pub users: Arc<UserStore>,
    pub tokens: Arc<TokenService>,
}

#[async_trait]
impl Handler for GetAccessToken {
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        let req: RefreshTokenRequest = decode(call.body)?;
        let access_token = self
            .tokens
            .redeem_refresh(&req.refresh_token, self.users.as_ref())
            .await?;
        reply(&AccessTokenResponse { access_token })
    }
}

/// Refresh token → fresh refresh token.
pub struct RenewRefreshToken {
    pub users: Arc<UserStore>,
    pub tokens: Arc<TokenService>,
}

#[async_trait]
impl Handler for RenewRefreshToken {
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        let req: RefreshTokenRequest = decode(call.body)?;
        let refresh_token = self
            .tokens
            .renew_refresh(&req.refresh_token, self.users.as_ref())
            .await?;
        reply(&RefreshTokenResponse { refresh_token })
    }
}
