//! JSON error responses for the HTTP API.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use shellgate::GatewayError;
use tracing::{debug, error};

/// A [`GatewayError`] rendered as `{"error": "..."}` with its status.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

/// Result type alias for route handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(GatewayError::InvalidInput(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.is_server_error() {
            error!("Request failed with {}: {}", status.as_u16(), self.0);
        } else {
            debug!("Request rejected with {}: {}", status.as_u16(), self.0);
        }
        (status, Json(json!({ "error": self.0.public_message() }))).into_response()
    }
}

/// `Json<T>` whose rejection is a 400 in the API's error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// Shorthand for a 400.
pub fn invalid(message: impl Into<String>) -> ApiError {
    ApiError(GatewayError::InvalidInput(message.into()))
}

/// Shorthand for a 404.
pub fn not_found(message: impl Into<String>) -> ApiError {
    ApiError(GatewayError::NotFound(message.into()))
}
