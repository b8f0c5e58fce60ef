//! Paginated audit log.

use super::error::ApiResult;
use super::extract::AdminKey;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use shellgate::model::TideQuery;
use shellgate::store::{AgentStore, AuditStore};
use shellgate::GatewayError;
use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

/// Query parameters are taken as strings so junk falls back to defaults
/// instead of rejecting the request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TideParams {
    crab_id: Option<String>,
    page: Option<String>,
    limit: Option<String>,
}

/// Resolved `(page, limit)`: page at least 1, limit within [1, 100].
#[must_use]
pub fn paging(page: Option<&str>, limit: Option<&str>) -> (usize, usize) {
    let page = page
        .and_then(|p| p.trim().parse::<i64>().ok())
        .map_or(1, |p| p.max(1) as usize);
    let limit = limit
        .and_then(|l| l.trim().parse::<i64>().ok())
        .map_or(DEFAULT_PAGE_SIZE, |l| l.clamp(1, MAX_PAGE_SIZE as i64) as usize);
    (page, limit)
}

/// `GET /v1/tides?crabId=&page=&limit=`: newest first.
pub async fn list(
    _: AdminKey,
    State(state): State<AppState>,
    Query(params): Query<TideParams>,
) -> ApiResult<impl IntoResponse> {
    let (page, limit) = paging(params.page.as_deref(), params.limit.as_deref());
    let result = state
        .store
        .list_tides(TideQuery {
            crab_id: params.crab_id.filter(|s| !s.is_empty()),
            offset: (page - 1).saturating_mul(limit),
            limit,
        })
        .await?;

    let mut names: HashMap<String, Option<String>> = HashMap::new();
    let mut tides = Vec::with_capacity(result.tides.len());
    for tide in result.tides {
        let crab = match &tide.crab_id {
            Some(id) => {
                if !names.contains_key(id) {
                    let name = state.store.get_crab(id).await?.map(|c| c.name);
                    names.insert(id.clone(), name);
                }
                names.get(id).cloned().flatten()
            }
            None => None,
        };
        let mut value = serde_json::to_value(&tide)
            .map_err(|e| GatewayError::Store(format!("serializing tide: {}", e)))?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "crab".to_string(),
                crab.map_or(Value::Null, |name| json!({ "name": name })),
            );
        }
        tides.push(value);
    }

    let pages = result.total.div_ceil(limit);
    Ok(Json(json!({
        "tides": tides,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": result.total,
            "pages": pages,
        },
    })))
}
