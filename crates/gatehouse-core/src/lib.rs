//! Gatehouse core library: request security and resiliency for RPC handlers.
//!
//! `gatehouse-core` authenticates callers with signed tokens, authorizes them
//! against a per-endpoint role table, and protects handlers from overload and
//! cascading failure. It is transport-agnostic: a server adapts its own
//! requests into [`Call`]s and runs them through an [`InterceptorChain`].
//!
//! # Modules
//!
//! - [`token`]: JWT issuing/verification and the access/refresh [`TokenService`].
//! - [`access`]: [`AccessPolicyCache`], the lazily loaded endpoint → role table.
//! - [`limiter`]: [`RateLimiter`], a process-wide token bucket.
//! - [`breaker`]: [`CircuitBreaker`], the Closed/Open/HalfOpen failure gate.
//! - [`chain`]: [`Stage`], [`Handler`] and the [`InterceptorChain`] that orders them.
//! - [`source`]: storage collaborator traits ([`UserSource`], [`PolicySource`]).
//! - [`config`]: TOML settings for tokens, rate limiting and the breaker.
//! - [`status`]: the RPC [`Status`] returned to callers.
//! - [`error`]: internal error types of the individual components.

pub mod access;
pub mod breaker;
pub mod chain;
pub mod config;
pub mod error;
pub mod limiter;
pub mod source;
pub mod status;
pub mod token;

pub use access::AccessPolicyCache;
pub use breaker::{BreakerState, BreakerTransition, CircuitBreaker, Counts, Outcome};
pub use chain::{handler_fn, Call, Handler, InterceptorChain, Metadata, Next, Reply, Stage};
pub use config::settings::{BreakerConfig, GuardConfig, RateLimitConfig, TokenConfig};
pub use error::{ConfigError, PolicyError, SourceError, TokenError};
pub use limiter::RateLimiter;
pub use source::{AccessRule, PolicySource, UserRecord, UserSource};
pub use status::{Code, ErrorClass, RpcResult, Status};
pub use token::{Claims, ClaimsInput, TokenPair, TokenService};
