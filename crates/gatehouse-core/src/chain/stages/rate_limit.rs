use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::{Call, Next, Reply, Stage};
use crate::limiter::RateLimiter;
use crate::status::{RpcResult, Status};

/// Sheds load before any other work is done for the call.
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, call: Call, next: Next<'_>) -> RpcResult<Reply> {
        if !self.limiter.allow() {
            tracing::warn!(method = %call.method, "rate limit exceeded");
            return Err(Status::resource_exhausted("rate limit exceeded"));
        }
        next.run(call).await
    }
}
