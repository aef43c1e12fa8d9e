//! Interceptor chain around RPC handlers.
//!
//! A chain is an ordered list of [`Stage`]s. Each stage receives the call and
//! a [`Next`] handle to the rest of the chain, and decides whether to invoke
//! it and what to do with its result. The last `Next` runs the [`Handler`].
//!
//! The standard order is rate limit → circuit breaker → authentication →
//! authorization → handler.

pub mod stages;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::access::AccessPolicyCache;
use crate::breaker::CircuitBreaker;
use crate::limiter::RateLimiter;
use crate::status::RpcResult;
use crate::token::{Claims, TokenService};

pub use stages::{AuthnStage, AuthzStage, BreakerStage, RateLimitStage};

/// Successful handler output.
pub type Reply = serde_json::Value;

/// Request metadata (headers). Keys are case-insensitive and may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: HashMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

/// One inbound RPC as it travels through the chain.
#[derive(Debug, Clone)]
pub struct Call {
    /// Fully-qualified method name, e.g. `/user_v1.UserV1/Get`.
    pub method: String,
    pub metadata: Option<Metadata>,
    pub body: serde_json::Value,
    pub deadline: Option<Instant>,
    claims: Option<Claims>,
}

impl Call {
    pub fn new(method: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            metadata: None,
            body,
            deadline: None,
            claims: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Identity established by the authentication stage, if it ran.
    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    pub(crate) fn set_claims(&mut self, claims: Claims) {
        self.claims = Some(claims);
    }
}

/// The endpoint at the end of a chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, call: Call) -> RpcResult<Reply>;
}

/// Adapts an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Call) -> Fut + Send + Sync,
    Fut: Future<Output = RpcResult<Reply>> + Send,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Call) -> Fut + Send + Sync,
    Fut: Future<Output = RpcResult<Reply>> + Send,
{
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        (self.0)(call).await
    }
}

/// One interceptor in the chain.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, call: Call, next: Next<'_>) -> RpcResult<Reply>;
}

/// The remainder of a chain, ending in the handler.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Arc<dyn Stage>], handler: &'a dyn Handler) -> Self {
        Self { stages, handler }
    }

    /// Runs the next stage, or the handler if no stages are left.
    pub async fn run(self, call: Call) -> RpcResult<Reply> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                stage
                    .handle(
                        call,
                        Next {
                            stages: rest,
                            handler: self.handler,
                        },
                    )
                    .await
            }
            None => self.handler.call(call).await,
        }
    }
}

/// Ordered list of stages applied to every call dispatched through it.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Stage>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage; stages run in the order they were added.
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Rate limit → circuit breaker → authentication → authorization.
    pub fn standard(
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        tokens: Arc<TokenService>,
        policy: Arc<AccessPolicyCache>,
    ) -> Self {
        Self::public(limiter, breaker)
            .with_stage(AuthnStage::new(tokens))
            .with_stage(AuthzStage::new(policy))
    }

    /// Rate limit → circuit breaker, for methods that issue credentials and
    /// therefore cannot require one.
    pub fn public(limiter: Arc<RateLimiter>, breaker: Arc<CircuitBreaker>) -> Self {
        Self::new()
            .with_stage(RateLimitStage::new(limiter))
            .with_stage(BreakerStage::new(breaker))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub async fn dispatch(&self, call: Call, handler: &dyn Handler) -> RpcResult<Reply> {
        Next::new(&self.stages, handler).run(call).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::status::{Code, Status};

    /// Appends its tag on the way in and out.
    struct Trace {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Stage for Trace {
        fn name(&self) -> &'static str {
            self.tag
        }

        async fn handle(&self, call: Call, next: Next<'_>) -> RpcResult<Reply> {
            self.log.lock().unwrap().push(format!("{}>", self.tag));
            let result = next.run(call).await;
            self.log.lock().unwrap().push(format!("<{}", self.tag));
            result
        }
    }

    struct Reject;

    #[async_trait]
    impl Stage for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        async fn handle(&self, _call: Call, _next: Next<'_>) -> RpcResult<Reply> {
            Err(Status::permission_denied("nope"))
        }
    }

    #[test]
    fn metadata_keys_are_case_insensitive() {
        let metadata: Metadata = [("Authorization", "Bearer abc")].into_iter().collect();
        assert_eq!(metadata.get("authorization"), Some("Bearer abc"));
        assert_eq!(metadata.get("AUTHORIZATION"), Some("Bearer abc"));
        assert_eq!(metadata.get("x-missing"), None);
    }

    #[test]
    fn metadata_get_returns_first_value() {
        let mut metadata = Metadata::new();
        metadata.insert("authorization", "Bearer first");
        metadata.insert("authorization", "Bearer second");
        assert_eq!(metadata.get("authorization"), Some("Bearer first"));
    }

    #[tokio::test]
    async fn stages_run_in_order_around_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new()
            .with_stage(Trace { tag: "a", log: log.clone() })
            .with_stage(Trace { tag: "b", log: log.clone() });

        let handler_log = log.clone();
        let handler = handler_fn(move |call: Call| {
            let log = handler_log.clone();
            async move {
                log.lock().unwrap().push("handler".to_string());
                Ok(json!({ "method": call.method }))
            }
        });

        let reply = chain
            .dispatch(Call::new("/svc.Svc/Do", json!({})), &handler)
            .await
            .unwrap();

        assert_eq!(reply, json!({ "method": "/svc.Svc/Do" }));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a>", "b>", "handler", "<b", "<a"]
        );
        assert_eq!(chain.stage_names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_rest_of_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new()
            .with_stage(Reject)
            .with_stage(Trace { tag: "late", log: log.clone() });

        let handler = handler_fn(|_call: Call| async { Ok(json!(null)) });
        let err = chain
            .dispatch(Call::new("/svc.Svc/Do", json!({})), &handler)
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::PermissionDenied);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_chain_calls_handler_directly() {
        let handler = handler_fn(|call: Call| async move { Ok(call.body) });
        let reply = InterceptorChain::new()
            .dispatch(Call::new("/svc.Svc/Echo", json!({ "x": 1 })), &handler)
            .await
            .unwrap();
        assert_eq!(reply, json!({ "x": 1 }));
    }
}
