//! Runtime settings, merged over the built-in defaults.

use super::error::{invalid, not_found, ApiResult, JsonBody};
use super::extract::AdminKey;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use shellgate::settings;
use shellgate::store::SettingStore;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct PutSetting {
    value: Option<Value>,
}

/// `GET /v1/settings`: every known key, stored values winning.
pub async fn list(_: AdminKey, State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let effective = settings::effective(&*state.store).await?;
    Ok(Json(json!({ "settings": effective })))
}

/// `GET /v1/settings/:key`
pub async fn get_one(
    _: AdminKey,
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let value = match state.store.get_setting(&key).await? {
        Some(value) => value,
        None => settings::default_for(&key)
            .map(str::to_string)
            .ok_or_else(|| not_found(format!("Setting not found: {}", key)))?,
    };
    Ok(Json(json!({ "setting": { "key": key, "value": value } })))
}

/// `PUT /v1/settings/:key`: upsert `{value}`. Numbers and booleans are
/// stored in their JSON text form.
pub async fn put(
    _: AdminKey,
    State(state): State<AppState>,
    Path(key): Path<String>,
    JsonBody(body): JsonBody<PutSetting>,
) -> ApiResult<impl IntoResponse> {
    let value = match body.value {
        None | Some(Value::Null) => return Err(invalid("value is required")),
        Some(Value::String(s)) => s,
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        Some(_) => return Err(invalid("value must be a string")),
    };
    settings::validate(&key, &value)?;
    state.store.set_setting(&key, &value).await?;
    info!("Setting {} updated to {}", key, value);
    Ok(Json(json!({ "setting": { "key": key, "value": value } })))
}
