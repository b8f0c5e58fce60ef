//! Agent registration, listing and revocation.

use super::error::{invalid, not_found, ApiResult, JsonBody};
use super::extract::AdminKey;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shellgate::model::{validate_crab_name, Crab, NewCrab, ToolGrant};
use shellgate::store::AgentStore;
use shellgate::token::generate_token;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCrab {
    name: Option<String>,
    ui_port: Option<u16>,
    expires_at: Option<DateTime<Utc>>,
    allowed_tools: Option<Vec<ToolGrant>>,
}

/// An agent as shown to an admin. Never carries the token.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrabView {
    id: String,
    name: String,
    active: bool,
    expires_at: Option<DateTime<Utc>>,
    ui_port: Option<u16>,
    allowed_tools: Option<Vec<ToolGrant>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Crab> for CrabView {
    fn from(crab: Crab) -> Self {
        Self {
            id: crab.id,
            name: crab.name,
            active: crab.active,
            expires_at: crab.expires_at,
            ui_port: crab.ui_port,
            allowed_tools: crab.allowed_tools,
            created_at: crab.created_at,
            updated_at: crab.updated_at,
        }
    }
}

/// `POST /v1/crabs`: register an agent. The token is returned only here.
pub async fn create(
    _: AdminKey,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateCrab>,
) -> ApiResult<impl IntoResponse> {
    let name = body
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid("name is required"))?;
    validate_crab_name(&name)?;

    let token = generate_token()?;
    let crab = state
        .store
        .create_crab(
            NewCrab {
                name,
                expires_at: body.expires_at,
                allowed_tools: body.allowed_tools,
                ui_port: body.ui_port,
            },
            token.to_string(),
        )
        .await?;
    info!("Registered agent {} ({})", crab.name, crab.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": crab.id,
            "name": crab.name,
            "token": token.as_str(),
            "active": crab.active,
            "createdAt": crab.created_at,
        })),
    ))
}

/// `GET /v1/crabs`: newest first.
pub async fn list(_: AdminKey, State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let crabs: Vec<CrabView> = state
        .store
        .list_crabs()
        .await?
        .into_iter()
        .map(CrabView::from)
        .collect();
    Ok(Json(json!({ "crabs": crabs })))
}

/// `PATCH /v1/crabs/:id/revoke`: kill switch.
pub async fn revoke(
    _: AdminKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let crab = state
        .store
        .revoke_crab(&id)
        .await?
        .ok_or_else(|| not_found(format!("No agent found with id: {}", id)))?;
    info!("Revoked agent {} ({})", crab.name, crab.id);
    Ok(Json(json!({
        "id": crab.id,
        "name": crab.name,
        "active": crab.active,
        "updatedAt": crab.updated_at,
    })))
}
