use std::sync::Arc;

use gatehouse_core::{
    AccessPolicyCache, CircuitBreaker, InterceptorChain, RateLimiter, TokenService,
};

use crate::api::MethodTable;
use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::store::{ConfigPolicySource, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub breaker: Arc<CircuitBreaker>,
    /// Rate limit → breaker → authentication → authorization.
    pub protected: Arc<InterceptorChain>,
    /// Rate limit → breaker, for credential-issuing methods.
    pub public: Arc<InterceptorChain>,
    pub methods: Arc<MethodTable>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wires stores, token service, policy cache and both chains. The limiter
    /// and breaker are shared, so public and protected calls draw from the
    /// same bucket and trip the same breaker.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let users = Arc::new(UserStore::seeded(&config.users));
        let tokens = Arc::new(TokenService::new(config.guard.tokens.clone()));
        let policy = Arc::new(AccessPolicyCache::new(Arc::new(ConfigPolicySource::new(
            config.access_rules.clone(),
        ))));
        let limiter = Arc::new(RateLimiter::from_config(&config.guard.rate_limit));
        let breaker = Arc::new(CircuitBreaker::new(&config.guard.breaker));

        let protected = InterceptorChain::standard(
            limiter.clone(),
            breaker.clone(),
            tokens.clone(),
            policy.clone(),
        );
        let public = InterceptorChain::public(limiter, breaker.clone());
        let methods = MethodTable::new(users, tokens, policy);
        let metrics = Metrics::new()?;
        metrics.set_breaker_state(breaker.name(), breaker.state());

        tracing::debug!(
            users = config.users.len(),
            rules = config.access_rules.len(),
            "application state ready"
        );

        Ok(Self {
            config: Arc::new(config),
            breaker,
            protected: Arc::new(protected),
            public: Arc::new(public),
            methods: Arc::new(methods),
            metrics: Arc::new(metrics),
        })
    }
}
