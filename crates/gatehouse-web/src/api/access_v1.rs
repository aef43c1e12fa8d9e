use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::{AccessPolicyCache, Call, Handler, Reply, RpcResult, Status};

use super::{decode, reply};
use crate::dto::{CheckRequest, Empty};

pub const CHECK: &str = "/access_v1.AccessV1/Check";

/// Answers whether the caller's role may invoke `endpoint_address`.
///
/// Runs behind the authentication stage, so the caller's claims are set.
/// Unlisted endpoints are allowed.
pub struct Check {
    pub policy: Arc<AccessPolicyCache>,
}

#[async_trait]
impl Handler for Check {
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        let role = match call.claims() {
            Some(claims) => claims.role.clone(),
            None => return Err(Status::unauthenticated("caller identity is not established")),
        };
        let req: CheckRequest = decode(call.body)?;

        match self.policy.is_authorized(&req.endpoint_address, &role).await {
            Ok(true) => reply(&Empty {}),
            Ok(false) => Err(Status::permission_denied("access denied")),
            Err(e) => {
                tracing::error!(error = %e, "failed to get accessible roles");
                Err(Status::internal("failed to load access policy"))
            }
        }
    }
}
