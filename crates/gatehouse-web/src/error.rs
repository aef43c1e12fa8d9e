use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gatehouse_core::{Code, Status};
use serde::Serialize;

/// An RPC [`Status`] rendered as an HTTP error response.
#[derive(Debug)]
pub struct AppError(pub Status);

#[derive(Serialize)]
struct ErrorBody {
    code: Code,
    message: String,
}

impl From<Status> for AppError {
    fn from(status: Status) -> Self {
        AppError(status)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError(internal(e))
    }
}

/// Logs `e` and returns a generic `Internal` status.
pub fn internal(e: impl std::fmt::Display) -> Status {
    tracing::error!("Internal error: {e:#}");
    Status::internal("internal server error")
}

pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::Cancelled => StatusCode::REQUEST_TIMEOUT,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let body = ErrorBody {
            code,
            message: self.0.message().to_string(),
        };

        (http_status(code), axum::Json(body)).into_response()
    }
}
