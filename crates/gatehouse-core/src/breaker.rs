//! Three-state circuit breaker around handler invocations.
//!
//! ```text
//!            failure ratio > threshold            timeout elapsed
//!  Closed ───────────────────────────────▶ Open ─────────────────▶ HalfOpen
//!    ▲                                      ▲                          │
//!    │        max_requests trial successes  │     any trial failure    │
//!    └──────────────────────────────────────┼──────────────────────────┘
//!                                           └──────────────────────────┘
//! ```
//!
//! Every transition, and every roll of the closed-state counting window,
//! starts a new generation. An outcome is only counted if the generation it
//! was admitted under is still current.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::settings::{BreakerConfig, MAX_BREAKER_PERIOD_SECS};
use crate::status::{Code, RpcResult, Status};

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Request tallies for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.total_failures) / f64::from(self.requests)
        }
    }
}

/// Emitted on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerTransition {
    pub name: String,
    pub from: BreakerState,
    pub to: BreakerState,
    pub generation: u64,
}

/// Why the breaker refused to dispatch a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError {
    #[error("circuit breaker is open")]
    Open,
    #[error("too many trial requests while half-open")]
    TooManyTrials,
}

/// How an admitted call is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// The call never produced a handler result. Nothing is tallied and a
    /// half-open trial slot is released.
    Ignored,
}

/// Decides whether a handler error counts against the breaker.
pub type FailurePredicate = fn(&Status) -> bool;

/// Caller mistakes mean the handler answered; everything else is a failure.
pub fn default_is_failure(status: &Status) -> bool {
    !matches!(
        status.code(),
        Code::InvalidArgument
            | Code::NotFound
            | Code::AlreadyExists
            | Code::Unimplemented
            | Code::Unauthenticated
            | Code::PermissionDenied
    )
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    max_requests: u32,
    interval: Duration,
    timeout: Duration,
    failure_threshold: f64,
    min_requests: u32,
    is_failure: FailurePredicate,
    inner: Mutex<Inner>,
    events: broadcast::Sender<BreakerTransition>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("counts", &self.counts())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let longest = Duration::from_secs(MAX_BREAKER_PERIOD_SECS);
        let interval = config.interval().min(longest);
        Self {
            name: config.name.clone(),
            max_requests: config.max_requests.max(1),
            interval,
            timeout: config.timeout().min(longest),
            failure_threshold: config.failure_threshold,
            min_requests: config.min_requests,
            is_failure: default_is_failure,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: window_end(interval, Instant::now()),
            }),
            events,
        }
    }

    /// Replaces the rule deciding which handler errors are failures.
    pub fn with_failure_predicate(mut self, is_failure: FailurePredicate) -> Self {
        self.is_failure = is_failure;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying any due timeout or window roll.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now())
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now());
        inner.counts
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Receives every future state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
        self.events.subscribe()
    }

    /// Runs `fut` if the breaker admits it, and records the outcome.
    ///
    /// The handler's own result is returned unchanged. Only the breaker's
    /// refusal is turned into `Unavailable`. With a `deadline`, a handler still
    /// running at that instant is abandoned with `DeadlineExceeded`. If the
    /// returned future is dropped before the handler finishes, the call is
    /// recorded as one failure.
    pub async fn call<T, F>(&self, deadline: Option<Instant>, fut: F) -> RpcResult<T>
    where
        F: Future<Output = RpcResult<T>>,
    {
        self.call_recorded(deadline, fut, |result| self.outcome_of(result))
            .await
    }

    /// Like [`CircuitBreaker::call`], with `record` deciding how the result
    /// is counted. A dropped call is still recorded as a failure.
    pub async fn call_recorded<T, F, R>(
        &self,
        deadline: Option<Instant>,
        fut: F,
        record: R,
    ) -> RpcResult<T>
    where
        F: Future<Output = RpcResult<T>>,
        R: FnOnce(&RpcResult<T>) -> Outcome,
    {
        let generation = self.before_call(Instant::now()).map_err(|e| {
            tracing::warn!(breaker = %self.name, reason = %e, "call rejected by circuit breaker");
            Status::unavailable("service unavailable")
        })?;

        let mut guard = InFlight {
            breaker: self,
            generation,
            settled: false,
        };

        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(Status::deadline_exceeded("deadline exceeded")),
            },
            None => fut.await,
        };

        guard.settle(record(&result));
        result
    }

    /// The outcome of a handler result under the failure predicate.
    pub fn outcome_of<T>(&self, result: &RpcResult<T>) -> Outcome {
        match result {
            Err(status) if (self.is_failure)(status) => Outcome::Failure,
            _ => Outcome::Success,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn before_call(&self, now: Instant) -> Result<u64, BreakerError> {
        let mut inner = self.lock();
        match self.current_state(&mut inner, now) {
            BreakerState::Open => return Err(BreakerError::Open),
            BreakerState::HalfOpen if inner.counts.requests >= self.max_requests => {
                return Err(BreakerError::TooManyTrials)
            }
            _ => {}
        }
        inner.counts.on_request();
        Ok(inner.generation)
    }

    fn after_call(&self, generation: u64, outcome: Outcome, now: Instant) {
        let mut inner = self.lock();
        let state = self.current_state(&mut inner, now);
        if generation != inner.generation {
            tracing::debug!(
                breaker = %self.name,
                generation,
                current = inner.generation,
                "discarding outcome from stale generation"
            );
            return;
        }

        match outcome {
            Outcome::Success => self.on_success(&mut inner, state, now),
            Outcome::Failure => self.on_failure(&mut inner, state, now),
            Outcome::Ignored => {
                inner.counts.requests = inner.counts.requests.saturating_sub(1);
            }
        }
    }

    fn on_success(&self, inner: &mut Inner, state: BreakerState, now: Instant) {
        match state {
            BreakerState::Closed => inner.counts.on_success(),
            BreakerState::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.max_requests {
                    self.set_state(inner, BreakerState::Closed, now);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut Inner, state: BreakerState, now: Instant) {
        match state {
            BreakerState::Closed => {
                inner.counts.on_failure();
                if self.ready_to_trip(&inner.counts) {
                    self.set_state(inner, BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => self.set_state(inner, BreakerState::Open, now),
            BreakerState::Open => {}
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.min_requests && counts.failure_ratio() > self.failure_threshold
    }

    fn current_state(&self, inner: &mut Inner, now: Instant) -> BreakerState {
        match inner.state {
            BreakerState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            BreakerState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
        inner.state
    }

    fn set_state(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.new_generation(inner, now);

        tracing::debug!(
            breaker = %self.name,
            %from,
            %to,
            generation = inner.generation,
            "circuit breaker state changed"
        );
        // No subscribers is fine.
        let _ = self.events.send(BreakerTransition {
            name: self.name.clone(),
            from,
            to,
            generation: inner.generation,
        });
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            BreakerState::Closed => window_end(self.interval, now),
            BreakerState::Open => now.checked_add(self.timeout),
            BreakerState::HalfOpen => None,
        };
    }
}

fn window_end(interval: Duration, now: Instant) -> Option<Instant> {
    if interval.is_zero() {
        None
    } else {
        now.checked_add(interval)
    }
}

/// Records exactly one outcome for an admitted call, even if it is dropped.
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(&mut self, outcome: Outcome) {
        if !self.settled {
            self.settled = true;
            self.breaker
                .after_call(self.generation, outcome, Instant::now());
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(breaker = %self.breaker.name, "call abandoned mid-flight");
            self.settle(Outcome::Failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            name: "test".to_string(),
            max_requests: 2,
            interval_secs: 0,
            timeout_secs: 10,
            failure_threshold: 0.6,
            min_requests: 5,
        }
    }

    async fn ok(breaker: &CircuitBreaker) -> RpcResult<u32> {
        breaker.call(None, async { Ok(1) }).await
    }

    async fn fail(breaker: &CircuitBreaker) -> RpcResult<u32> {
        breaker
            .call(None, async { Err(Status::internal("boom")) })
            .await
    }

    /// Two successes then four failures: 4/6 > 0.6 with the floor of 5 met.
    async fn trip(breaker: &CircuitBreaker) {
        ok(breaker).await.unwrap();
        ok(breaker).await.unwrap();
        for _ in 0..3 {
            fail(breaker).await.unwrap_err();
        }
        // 3/5 is not above the threshold yet.
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail(breaker).await.unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn trips_past_threshold_and_rejects_without_dispatch() {
        let breaker = CircuitBreaker::new(&config());
        trip(&breaker).await;

        let invoked = AtomicUsize::new(0);
        let err = breaker
            .call(None, async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Status>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn min_requests_floor_prevents_early_trip() {
        let breaker = CircuitBreaker::new(&config());
        for _ in 0..4 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn trials_close_after_max_requests_successes() {
        let breaker = CircuitBreaker::new(&config());
        trip(&breaker).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        ok(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        ok(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.counts(), Counts::default());

        // Fresh window: a few failures stay under the floor.
        for _ in 0..4 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_failure_reopens() {
        let breaker = CircuitBreaker::new(&config());
        trip(&breaker).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Open);

        // The open timeout restarted.
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_limits_concurrent_trials() {
        let breaker = Arc::new(CircuitBreaker::new(&BreakerConfig {
            max_requests: 1,
            ..config()
        }));
        trip_with_single_trial(&breaker).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(None, async move {
                        let _ = wait.await;
                        Ok::<_, Status>(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let err = ok(&breaker).await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);

        release.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    async fn trip_with_single_trial(breaker: &CircuitBreaker) {
        for _ in 0..5 {
            fail(breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_errors_pass_through_verbatim() {
        let breaker = CircuitBreaker::new(&config());
        let err = breaker
            .call(None, async {
                Err::<(), _>(Status::not_found("user alice not found"))
            })
            .await
            .unwrap_err();

        assert_eq!(err, Status::not_found("user alice not found"));
        // Caller errors are not breaker failures.
        assert_eq!(breaker.counts().total_failures, 0);
        assert_eq!(breaker.counts().total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_counts_every_error() {
        let breaker = CircuitBreaker::new(&config()).with_failure_predicate(|_| true);
        breaker
            .call(None, async { Err::<(), _>(Status::not_found("gone")) })
            .await
            .unwrap_err();
        assert_eq!(breaker.counts().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_outcome_is_discarded() {
        let breaker = CircuitBreaker::new(&BreakerConfig {
            interval_secs: 5,
            ..config()
        });

        let generation = breaker.before_call(Instant::now()).unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        breaker.after_call(generation, Outcome::Failure, Instant::now());

        assert!(breaker.generation() > generation);
        assert_eq!(breaker.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_rolls_closed_window() {
        let breaker = CircuitBreaker::new(&BreakerConfig {
            interval_secs: 5,
            ..config()
        });
        for _ in 0..4 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(5)).await;

        // The old failures no longer count toward the floor.
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.counts().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_as_one_failure() {
        let breaker = CircuitBreaker::new(&config());
        let deadline = Instant::now() + Duration::from_secs(1);

        let err = breaker
            .call(Some(deadline), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Status>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::DeadlineExceeded);
        let counts = breaker.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_counts_as_one_failure() {
        let breaker = CircuitBreaker::new(&config());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call(None, std::future::pending::<RpcResult<()>>()),
        )
        .await;
        assert!(abandoned.is_err());

        let counts = breaker.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.total_failures, 1);
        assert_eq!(counts.total_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_outcome_releases_trial_slot() {
        let breaker = CircuitBreaker::new(&BreakerConfig {
            max_requests: 1,
            ..config()
        });
        trip_with_single_trial(&breaker).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let err = breaker
            .call_recorded(
                None,
                async { Err::<(), _>(Status::unauthenticated("no token")) },
                |_| Outcome::Ignored,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.counts(), Counts::default());

        // The slot is free for a real trial.
        ok(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_periods_do_not_overflow_instants() {
        let breaker = CircuitBreaker::new(&BreakerConfig {
            timeout_secs: u64::MAX,
            interval_secs: u64::MAX,
            ..config()
        });
        for _ in 0..5 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_are_broadcast() {
        let breaker = CircuitBreaker::new(&config());
        let mut events = breaker.subscribe();

        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        ok(&breaker).await.unwrap();
        ok(&breaker).await.unwrap();

        let opened = events.recv().await.unwrap();
        assert_eq!((opened.from, opened.to), (BreakerState::Closed, BreakerState::Open));
        assert_eq!(opened.name, "test");

        let probing = events.recv().await.unwrap();
        assert_eq!(probing.to, BreakerState::HalfOpen);

        let closed = events.recv().await.unwrap();
        assert_eq!(closed.to, BreakerState::Closed);
        assert!(closed.generation > opened.generation);
    }
}
