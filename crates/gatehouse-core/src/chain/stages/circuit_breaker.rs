use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::breaker::{CircuitBreaker, Outcome};
use crate::chain::{Call, Handler, Next, Reply, Stage};
use crate::status::{Code, RpcResult};

/// Runs the rest of the chain inside the breaker so it sees the outcome.
///
/// Only handler results move the breaker. A call rejected by a later stage
/// (authentication, authorization) is recorded as [`Outcome::Ignored`],
/// unless it ran out of time, which counts as a failure.
pub struct BreakerStage {
    breaker: Arc<CircuitBreaker>,
}

impl BreakerStage {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

/// Notes whether the call got as far as the handler.
struct Reached<'a> {
    handler: &'a dyn Handler,
    reached: AtomicBool,
}

#[async_trait]
impl Handler for Reached<'_> {
    async fn call(&self, call: Call) -> RpcResult<Reply> {
        self.reached.store(true, Ordering::SeqCst);
        self.handler.call(call).await
    }
}

#[async_trait]
impl Stage for BreakerStage {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn handle(&self, call: Call, next: Next<'_>) -> RpcResult<Reply> {
        let deadline = call.deadline;
        let tracked = Reached {
            handler: next.handler,
            reached: AtomicBool::new(false),
        };
        let rest = Next::new(next.stages, &tracked);
        let breaker = &self.breaker;

        breaker
            .call_recorded(deadline, rest.run(call), |result| {
                if tracked.reached.load(Ordering::SeqCst) {
                    return breaker.outcome_of(result);
                }
                match result {
                    Err(status) if status.code() == Code::DeadlineExceeded => Outcome::Failure,
                    _ => {
                        tracing::debug!(breaker = %breaker.name(), "call rejected before handler");
                        Outcome::Ignored
                    }
                }
            })
            .await
    }
}
