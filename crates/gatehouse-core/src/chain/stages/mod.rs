//! The four standard interceptor stages.

mod authn;
mod authz;
mod circuit_breaker;
mod rate_limit;

pub use authn::{bearer_token, AuthnStage};
pub use authz::AuthzStage;
pub use circuit_breaker::BreakerStage;
pub use rate_limit::RateLimitStage;
