use std::sync::Arc;

use async_trait::async_trait;

use crate::access::AccessPolicyCache;
use crate::chain::{Call, Next, Reply, Stage};
use crate::status::{RpcResult, Status};

/// Checks the authenticated role against the endpoint's access rule.
pub struct AuthzStage {
    policy: Arc<AccessPolicyCache>,
}

impl AuthzStage {
    pub fn new(policy: Arc<AccessPolicyCache>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Stage for AuthzStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn handle(&self, call: Call, next: Next<'_>) -> RpcResult<Reply> {
        let (user, role) = match call.claims() {
            Some(claims) => (claims.sub.clone(), claims.role.clone()),
            None => return Err(Status::unauthenticated("caller identity is not established")),
        };

        let decision = self.policy.is_authorized(&call.method, &role).await;
        match decision {
            Ok(true) => next.run(call).await,
            Ok(false) => {
                tracing::warn!(method = %call.method, %user, %role, "access denied");
                Err(Status::permission_denied("access denied"))
            }
            Err(e) => {
                tracing::error!(method = %call.method, error = %e, "authorization unavailable");
                Err(Status::internal("failed to load access policy"))
            }
        }
    }
}
