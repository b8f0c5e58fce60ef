//! Credential storage. Plaintext goes in once and never comes back out.

use super::error::{invalid, not_found, ApiResult, JsonBody};
use super::extract::AdminKey;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shellgate::model::{Pearl, PearlUpsert};
use shellgate::store::{AgentStore, VaultStore};
use zeroize::Zeroizing;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSecret {
    crab_id: Option<String>,
    service: Option<String>,
    plaintext: Option<String>,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretFilter {
    crab_id: Option<String>,
}

/// A credential record without any sealed material.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PearlView {
    id: String,
    crab_id: String,
    service: String,
    label: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Pearl> for PearlView {
    fn from(pearl: Pearl) -> Self {
        Self {
            id: pearl.id,
            crab_id: pearl.crab_id,
            service: pearl.service,
            label: pearl.label,
            created_at: pearl.created_at,
            updated_at: pearl.updated_at,
        }
    }
}

/// `POST /v1/secrets`: seal and store, replacing any credential for the
/// same (agent, service). Every call draws a fresh IV.
pub async fn upsert(
    _: AdminKey,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<UpsertSecret>,
) -> ApiResult<impl IntoResponse> {
    let (Some(crab_id), Some(service), Some(plaintext)) = (
        body.crab_id.filter(|s| !s.is_empty()),
        body.service.filter(|s| !s.is_empty()),
        body.plaintext.filter(|s| !s.is_empty()).map(Zeroizing::new),
    ) else {
        return Err(invalid("crabId, service, and plaintext are required"));
    };

    if state.store.get_crab(&crab_id).await?.is_none() {
        return Err(not_found(format!("No agent found with id: {}", crab_id)));
    }

    let sealed = state.vault.encrypt(&plaintext)?;
    let pearl = state
        .store
        .upsert_pearl(PearlUpsert {
            crab_id,
            service,
            label: body.label,
            sealed,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(PearlView::from(pearl))))
}

/// `GET /v1/secrets?crabId=`: newest first.
pub async fn list(
    _: AdminKey,
    State(state): State<AppState>,
    Query(filter): Query<SecretFilter>,
) -> ApiResult<impl IntoResponse> {
    let pearls: Vec<PearlView> = state
        .store
        .list_pearls(filter.crab_id.as_deref().filter(|s| !s.is_empty()))
        .await?
        .into_iter()
        .map(PearlView::from)
        .collect();
    Ok(Json(json!({ "pearls": pearls })))
}

/// `DELETE /v1/secrets/:id`
pub async fn remove(
    _: AdminKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.store.delete_pearl(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("No secret found with id: {}", id)))
    }
}
