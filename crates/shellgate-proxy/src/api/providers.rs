//! Model provider CRUD and RESTRICTED access grants.

use super::error::{invalid, not_found, ApiResult, JsonBody};
use super::extract::AdminKey;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use shellgate::model::{ModelProvider, NewProvider, ProviderPatch, ProviderProtocol, ProviderScope};
use shellgate::store::{AgentStore, ProviderStore};
use shellgate::GatewayError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProvider {
    name: Option<String>,
    base_url: Option<String>,
    protocol: Option<ProviderProtocol>,
    pearl_service: Option<String>,
    scope: Option<ProviderScope>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProvider {
    name: Option<String>,
    base_url: Option<String>,
    protocol: Option<ProviderProtocol>,
    /// Absent leaves the field alone; `null` or `""` clears it.
    #[serde(default, deserialize_with = "present")]
    pearl_service: Option<Option<String>>,
    scope: Option<ProviderScope>,
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantAccess {
    crab_id: Option<String>,
}

/// Distinguish an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn check_base_url(base_url: &str) -> ApiResult<()> {
    url::Url::parse(base_url)
        .map(|_| ())
        .map_err(|_| invalid("baseUrl must be a valid URL"))
}

fn provider_not_found() -> super::error::ApiError {
    not_found("Provider not found")
}

async fn with_access(state: &AppState, provider: ModelProvider) -> ApiResult<Value> {
    let grants = state.store.list_grants(&provider.id).await?;
    let mut value = serde_json::to_value(&provider)
        .map_err(|e| GatewayError::Store(format!("serializing provider: {}", e)))?;
    if let Value::Object(map) = &mut value {
        let access: Vec<Value> = grants
            .iter()
            .map(|g| json!({ "crabId": g.crab_id }))
            .collect();
        map.insert("access".to_string(), Value::Array(access));
    }
    Ok(value)
}

/// `GET /v1/providers`: creation order, each with its grants.
pub async fn list(_: AdminKey, State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let mut providers = Vec::new();
    for provider in state.store.list_providers().await? {
        providers.push(with_access(&state, provider).await?);
    }
    Ok(Json(json!({ "providers": providers })))
}

/// `POST /v1/providers`
pub async fn create(
    _: AdminKey,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateProvider>,
) -> ApiResult<impl IntoResponse> {
    let (Some(name), Some(base_url)) = (
        body.name.filter(|s| !s.is_empty()),
        body.base_url.filter(|s| !s.is_empty()),
    ) else {
        return Err(invalid("name and baseUrl are required"));
    };
    check_base_url(&base_url)?;

    let provider = state
        .store
        .create_provider(NewProvider {
            name,
            base_url,
            protocol: body.protocol.unwrap_or_default(),
            pearl_service: body.pearl_service.filter(|s| !s.is_empty()),
            scope: body.scope.unwrap_or_default(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "provider": provider }))))
}

/// `PATCH /v1/providers/:id`: partial update.
pub async fn update(
    _: AdminKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<UpdateProvider>,
) -> ApiResult<impl IntoResponse> {
    if let Some(base_url) = &body.base_url {
        check_base_url(base_url)?;
    }
    let patch = ProviderPatch {
        name: body.name,
        base_url: body.base_url,
        protocol: body.protocol,
        pearl_service: body
            .pearl_service
            .map(|service| service.filter(|s| !s.is_empty())),
        scope: body.scope,
        active: body.active,
    };
    let provider = state
        .store
        .update_provider(&id, patch)
        .await?
        .ok_or_else(provider_not_found)?;
    Ok(Json(json!({ "provider": provider })))
}

/// `DELETE /v1/providers/:id`: also drops its grants.
pub async fn remove(
    _: AdminKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.store.delete_provider(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(provider_not_found())
    }
}

/// `POST /v1/providers/:id/access`: idempotent.
pub async fn grant(
    _: AdminKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<GrantAccess>,
) -> ApiResult<impl IntoResponse> {
    let crab_id = body
        .crab_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("crabId is required"))?;
    if state.store.get_provider(&id).await?.is_none() {
        return Err(provider_not_found());
    }
    if state.store.get_crab(&crab_id).await?.is_none() {
        return Err(not_found(format!("No agent found with id: {}", crab_id)));
    }
    let access = state.store.grant_provider(&id, &crab_id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "access": access }))))
}

/// `DELETE /v1/providers/:id/access/:crab_id`
pub async fn revoke(
    _: AdminKey,
    State(state): State<AppState>,
    Path((id, crab_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if state.store.revoke_provider_grant(&id, &crab_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Access grant not found"))
    }
}
