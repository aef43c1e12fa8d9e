pub mod access_v1;
pub mod auth_v1;
pub mod user_v1;
mod validate;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use gatehouse_core::{
    AccessPolicyCache, Call, Handler, Metadata, Reply, RpcResult, Status, TokenService,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{internal, AppError};
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::store::UserStore;

/// Which chain a method is dispatched through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    /// Rate limit and breaker only. For methods that hand out credentials.
    Public,
    /// The full chain, including authentication and authorization.
    Protected,
}

pub struct Method {
    pub exposure: Exposure,
    pub handler: Arc<dyn Handler>,
}

/// Fully-qualified method name → handler.
pub struct MethodTable {
    methods: HashMap<&'static str, Method>,
}

impl MethodTable {
    pub fn new(
        users: Arc<UserStore>,
        tokens: Arc<TokenService>,
        policy: Arc<AccessPolicyCache>,
    ) -> Self {
        let mut table = Self {
            methods: HashMap::new(),
        };

        table.add(user_v1::CREATE, Exposure::Protected, user_v1::Create { users: users.clone() });
        table.add(user_v1::GET, Exposure::Protected, user_v1::Get { users: users.clone() });
        table.add(user_v1::LIST, Exposure::Protected, user_v1::List { users: users.clone() });
        table.add(user_v1::DELETE, Exposure::Protected, user_v1::Delete { users: users.clone() });

        table.add(
            auth_v1::GET_REFRESH_TOKEN,
            Exposure::Public,
            auth_v1::GetRefreshToken {
                users: users.clone(),
                tokens: tokens.clone(),
            },
        );
        table.add(
            auth_v1::LOGIN,
            Exposure::Public,
            auth_v1::Login {
                users: users.clone(),
                tokens: tokens.clone(),
            },
        );
        table.add(
            auth_v1::GET_ACCESS_TOKEN,
            Exposure::Public,
            auth_v1::GetAccessToken {
                users: users.clone(),
                tokens: tokens.clone(),
            },
        );
        table.add(
            auth_v1::RENEW_REFRESH_TOKEN,
            Exposure::Public,
            auth_v1::RenewRefreshToken { users, tokens },
        );

        table.add(access_v1::CHECK, Exposure::Protected, access_v1::Check { policy });

        table
    }

    fn add(&mut self, name: &'static str, exposure: Exposure, handler: impl Handler + 'static) {
        self.methods.insert(
            name,
            Method {
                exposure,
                handler: Arc::new(handler),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/{service}/{method}", post(dispatch))
}

/// `POST /{service}/{method}` → `/{service}/{method}` through the method's chain.
async fn dispatch(
    State(state): State<AppState>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Reply>, AppError> {
    let name = format!("/{service}/{method}");
    let Some(target) = state.methods.get(&name) else {
        tracing::debug!(method = %name, "unknown method");
        return Err(Status::unimplemented(format!("unknown method {name}")).into());
    };

    let body = if body.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| Status::invalid_argument(format!("invalid request body: {e}")))?
    };

    let mut call = Call::new(name.clone(), body);
    if let Some(deadline) = Instant::now().checked_add(state.config.request_timeout()) {
        call = call.with_deadline(deadline);
    }
    if let Some(metadata) = metadata_from(&headers) {
        call = call.with_metadata(metadata);
    }

    let chain = match target.exposure {
        Exposure::Public => &state.public,
        Exposure::Protected => &state.protected,
    };
    let result = chain.dispatch(call, target.handler.as_ref()).await;
    state.metrics.observe(&name, &result);
    Ok(Json(result?))
}

/// Request headers as call metadata. Non-UTF-8 values are skipped.
fn metadata_from(headers: &HeaderMap) -> Option<Metadata> {
    let metadata: Metadata = headers
        .iter()
        .filter_map(|(key, value)| Some((key.as_str(), value.to_str().ok()?)))
        .collect();
    (!metadata.is_empty()).then_some(metadata)
}

fn decode<T: DeserializeOwned>(body: serde_json::Value) -> RpcResult<T> {
    serde_json::from_value(body)
        .map_err(|e| Status::invalid_argument(format!("invalid request body: {e}")))
}

fn reply<T: Serialize>(value: &T) -> RpcResult<Reply> {
    serde_json::to_value(value).map_err(internal)
}
