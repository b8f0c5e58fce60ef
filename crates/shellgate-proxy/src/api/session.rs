//! Admin login sessions for the dashboard.

use super::error::{ApiError, ApiResult, JsonBody};
use super::extract::{clear_session_cookie, session_cookie, session_token};
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use cookie::time::Duration;
use serde::Deserialize;
use serde_json::json;
use shellgate::{settings, GatewayError};
use tracing::info;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    api_key: Option<String>,
}

/// `POST /v1/auth/login`: trade the admin key for a session cookie.
pub async fn login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Login>,
) -> ApiResult<Response> {
    let api_key = body.api_key.filter(|k| !k.is_empty());
    state.admin.check_key(api_key.as_deref()).map_err(|e| match e {
        GatewayError::Unauthorized(_) => {
            ApiError(GatewayError::Unauthorized("Invalid admin API key".to_string()))
        }
        other => ApiError(other),
    })?;

    let ttl_hours = settings::session_ttl_hours(&*state.store).await?;
    let token = state.admin.issue_session()?;
    let max_age = i64::try_from(ttl_hours.saturating_mul(3600)).unwrap_or(i64::MAX);
    let jar = CookieJar::new().add(session_cookie(
        token,
        Duration::seconds(max_age),
        state.config.secure_cookies,
    ));
    info!("Admin session issued");
    Ok((jar, Json(json!({ "ok": true }))).into_response())
}

/// `POST /v1/auth/logout`
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let jar = CookieJar::new().add(clear_session_cookie(state.config.secure_cookies));
    (jar, Json(json!({ "ok": true })))
}

/// `GET /v1/auth/me`: `{ok: true}` while the cookie is valid.
pub async fn me(State(state): State<AppState>, jar: CookieJar) -> ApiResult<Response> {
    match state
        .admin
        .check_session(&*state.store, session_token(&jar))
        .await
    {
        Ok(()) => Ok(Json(json!({ "ok": true })).into_response()),
        Err(GatewayError::Unauthorized(_)) => {
            Ok((StatusCode::UNAUTHORIZED, Json(json!({ "ok": false }))).into_response())
        }
        Err(e) => Err(ApiError(e)),
    }
}
