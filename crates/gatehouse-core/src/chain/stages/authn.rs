use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::{Call, Next, Reply, Stage};
use crate::status::{RpcResult, Status};
use crate::token::TokenService;

const AUTHORIZATION: &str = "authorization";
const BEARER_PREFIX: &str = "Bearer ";

/// Extracts the bearer token from the call's `authorization` metadata.
pub fn bearer_token(call: &Call) -> RpcResult<&str> {
    let metadata = call
        .metadata
        .as_ref()
        .ok_or_else(|| Status::unauthenticated("metadata is not provided"))?;

    let header = metadata
        .get(AUTHORIZATION)
        .ok_or_else(|| Status::unauthenticated("authorization header is not provided"))?;

    header
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| Status::unauthenticated("invalid authorization header format"))
}

/// Verifies the caller's access token and attaches its claims to the call.
///
/// Every verification failure (expired, malformed, wrong signature) yields
/// the same `Unauthenticated` status; the precise reason is only logged.
pub struct AuthnStage {
    tokens: Arc<TokenService>,
}

impl AuthnStage {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Stage for AuthnStage {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn handle(&self, mut call: Call, next: Next<'_>) -> RpcResult<Reply> {
        let verified = bearer_token(&call).and_then(|token| {
            self.tokens.verify_access(token).map_err(|e| {
                tracing::debug!(method = %call.method, error = %e, "access token rejected");
                Status::unauthenticated("access token is invalid")
            })
        });

        let claims = match verified {
            Ok(claims) => claims,
            Err(status) => {
                tracing::warn!(
                    method = %call.method,
                    reason = status.message(),
                    "unauthenticated call"
                );
                return Err(status);
            }
        };

        tracing::debug!(method = %call.method, user = %claims.sub, "caller authenticated");
        call.set_claims(claims);
        next.run(call).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::chain::{handler_fn, InterceptorChain, Metadata};
    use crate::config::settings::TokenConfig;
    use crate::source::UserRecord;
    use crate::status::Code;
    use crate::token::{issue_at, unix_now, ClaimsInput};

    fn tokens() -> Arc<TokenService> {
        Arc::new(TokenService::new(TokenConfig {
            access_secret: "access-secret-for-tests".to_string(),
            refresh_secret: "refresh-secret-for-tests".to_string(),
            access_ttl_minutes: 5,
            refresh_ttl_minutes: 60,
        }))
    }

    fn carol() -> UserRecord {
        UserRecord {
            username: "carol".to_string(),
            email: "carol@example.com".to_string(),
            role: "user".to_string(),
        }
    }

    fn call_with(header: Option<&str>) -> Call {
        let call = Call::new("/user_v1.UserV1/Get", json!({}));
        match header {
            Some(value) => call.with_metadata([("authorization", value)].into_iter().collect()),
            None => call,
        }
    }

    /// Echoes the authenticated username.
    async fn dispatch(tokens: Arc<TokenService>, call: Call) -> RpcResult<Reply> {
        let chain = InterceptorChain::new().with_stage(AuthnStage::new(tokens));
        let handler = handler_fn(|call: Call| async move {
            let user = call.claims().map(|c| c.sub.clone()).unwrap_or_default();
            Ok(json!({ "user": user }))
        });
        chain.dispatch(call, &handler).await
    }

    #[tokio::test]
    async fn valid_bearer_attaches_claims() {
        let tokens = tokens();
        let token = tokens.issue_access(&carol()).unwrap();

        let reply = dispatch(tokens, call_with(Some(&format!("Bearer {token}"))))
            .await
            .unwrap();
        assert_eq!(reply, json!({ "user": "carol" }));
    }

    #[tokio::test]
    async fn missing_metadata_is_unauthenticated() {
        let err = dispatch(tokens(), call_with(None)).await.unwrap_err();
        assert_eq!(err, Status::unauthenticated("metadata is not provided"));
    }

    #[tokio::test]
    async fn missing_header_is_unauthenticated() {
        let call = Call::new("/user_v1.UserV1/Get", json!({}))
            .with_metadata([("x-request-id", "42")].into_iter().collect::<Metadata>());
        let err = dispatch(tokens(), call).await.unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn wrong_scheme_is_unauthenticated() {
        let token = tokens().issue_access(&carol()).unwrap();
        let err = dispatch(tokens(), call_with(Some(&format!("Basic {token}"))))
            .await
            .unwrap_err();
        assert_eq!(err, Status::unauthenticated("invalid authorization header format"));
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let tokens = tokens();
        let refresh = tokens.issue_refresh(&carol()).unwrap();
        let err = dispatch(tokens, call_with(Some(&format!("Bearer {refresh}"))))
            .await
            .unwrap_err();
        assert_eq!(err, Status::unauthenticated("access token is invalid"));
    }

    #[tokio::test]
    async fn expired_and_garbage_tokens_look_the_same() {
        let expired = issue_at(
            &ClaimsInput::from(&carol()),
            "access-secret-for-tests",
            Duration::from_secs(60),
            unix_now() - 3600,
        )
        .unwrap();

        let a = dispatch(tokens(), call_with(Some(&format!("Bearer {expired}"))))
            .await
            .unwrap_err();
        let b = dispatch(tokens(), call_with(Some("Bearer garbage")))
            .await
            .unwrap_err();
        assert_eq!(a, b);
    }
}
