use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use gatehouse_core::{BreakerState, BreakerTransition, Code, RpcResult};
use prometheus::{opts, Encoder, IntCounterVec, IntGaugeVec, Registry, TextEncoder};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use crate::state::AppState;

/// Codes produced by the guard stages rather than by handlers.
const REJECTION_CODES: [Code; 4] = [
    Code::ResourceExhausted,
    Code::Unavailable,
    Code::Unauthenticated,
    Code::PermissionDenied,
];

/// Per-server Prometheus registry and the collectors registered in it.
pub struct Metrics {
    registry: Registry,
    calls: IntCounterVec,
    rejections: IntCounterVec,
    breaker_state: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let calls = IntCounterVec::new(
            opts!(
                "gatehouse_calls_total",
                "Dispatched calls grouped by method and result code"
            ),
            &["method", "code"],
        )?;
        let rejections = IntCounterVec::new(
            opts!(
                "gatehouse_rejections_total",
                "Calls refused by the rate limiter, breaker, authentication or authorization"
            ),
            &["code"],
        )?;
        let breaker_state = IntGaugeVec::new(
            opts!(
                "gatehouse_breaker_state",
                "Circuit breaker state: 0 closed, 1 half-open, 2 open"
            ),
            &["breaker"],
        )?;

        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(rejections.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;

        // Export every rejection series from the start, not only once hit.
        for code in REJECTION_CODES {
            rejections.with_label_values(&[code.as_str()]);
        }

        Ok(Self {
            registry,
            calls,
            rejections,
            breaker_state,
        })
    }

    /// Counts one dispatched call.
    pub fn observe<T>(&self, method: &str, result: &RpcResult<T>) {
        let code = match result {
            Ok(_) => "OK",
            Err(status) => {
                if REJECTION_CODES.contains(&status.code()) {
                    self.rejections
                        .with_label_values(&[status.code().as_str()])
                        .inc();
                }
                status.code().as_str()
            }
        };
        self.calls.with_label_values(&[method, code]).inc();
    }

    pub fn set_breaker_state(&self, breaker: &str, state: BreakerState) {
        let value = match state {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        };
        self.breaker_state.with_label_values(&[breaker]).set(value);
    }

    /// Text exposition of everything in the registry.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Logs breaker transitions and mirrors them into the state gauge. Returns
/// once the breaker is dropped.
pub async fn track_breaker(mut transitions: Receiver<BreakerTransition>, metrics: Arc<Metrics>) {
    loop {
        match transitions.recv().await {
            Ok(t) => {
                metrics.set_breaker_state(&t.name, t.to);
                if t.to == BreakerState::Open {
                    tracing::warn!(
                        breaker = %t.name,
                        from = %t.from,
                        generation = t.generation,
                        "circuit breaker opened"
                    );
                } else {
                    tracing::info!(
                        breaker = %t.name,
                        from = %t.from,
                        to = %t.to,
                        generation = t.generation,
                        "circuit breaker state changed"
                    );
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Missed {skipped} circuit breaker transitions");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(?err, "failed to encode prometheus metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
    }
}
