//! CONNECT policy rules.

use super::error::{invalid, not_found, ApiResult, JsonBody};
use super::extract::AdminKey;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use shellgate::model::{NewConnectRule, RuleAction};
use shellgate::store::{AgentStore, PolicyStore};

/// Priority given to rules created without one.
pub const DEFAULT_PRIORITY: i64 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRule {
    domain: Option<String>,
    action: Option<String>,
    crab_id: Option<String>,
    priority: Option<i64>,
    note: Option<String>,
}

/// `GET /v1/connect-rules`: evaluation order.
pub async fn list(_: AdminKey, State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let rules = state.store.list_rules().await?;
    Ok(Json(json!({ "rules": rules })))
}

/// `POST /v1/connect-rules`
pub async fn create(
    _: AdminKey,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateRule>,
) -> ApiResult<impl IntoResponse> {
    let (Some(domain), Some(action)) = (
        body.domain.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
        body.action.filter(|a| !a.is_empty()),
    ) else {
        return Err(invalid("domain and action are required"));
    };
    let action = RuleAction::parse(&action).ok_or_else(|| invalid("action must be ALLOW or DENY"))?;

    let crab_id = body.crab_id.filter(|id| !id.is_empty());
    if let Some(id) = &crab_id {
        if state.store.get_crab(id).await?.is_none() {
            return Err(not_found(format!("No agent found with id: {}", id)));
        }
    }

    let rule = state
        .store
        .create_rule(NewConnectRule {
            domain,
            action,
            crab_id,
            priority: body.priority.unwrap_or(DEFAULT_PRIORITY),
            note: body.note,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "rule": rule }))))
}

/// `DELETE /v1/connect-rules/:id`
pub async fn remove(
    _: AdminKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.store.delete_rule(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Rule not found"))
    }
}
