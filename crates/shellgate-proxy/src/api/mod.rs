//! HTTP routes served behind the raw-socket dispatcher.
//!
//! Agent routes authenticate with a bearer token, admin routes with the
//! admin API key header, and agent UI paths with the admin session cookie.
//! Anything under `/agents/` that no route matches falls through to the
//! agent UI relay.

pub mod agent_ui;
pub mod crabs;
pub mod error;
pub mod execute;
pub mod extract;
pub mod model;
pub mod providers;
pub mod rules;
pub mod secrets;
pub mod session;
pub mod settings;
pub mod tides;

use crate::state::AppState;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Build the router for every non-tunnel request.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/crabs", post(crabs::create).get(crabs::list))
        .route("/v1/crabs/:id/revoke", patch(crabs::revoke))
        .route("/v1/secrets", post(secrets::upsert).get(secrets::list))
        .route("/v1/secrets/:id", delete(secrets::remove))
        .route("/v1/execute", post(execute::execute))
        .route("/v1/chat/completions", post(model::chat_completions))
        .route("/v1/connect-rules", get(rules::list).post(rules::create))
        .route("/v1/connect-rules/:id", delete(rules::remove))
        .route("/v1/settings", get(settings::list))
        .route("/v1/settings/:key", get(settings::get_one).put(settings::put))
        .route("/v1/providers", get(providers::list).post(providers::create))
        .route(
            "/v1/providers/:id",
            patch(providers::update).delete(providers::remove),
        )
        .route("/v1/providers/:id/access", post(providers::grant))
        .route(
            "/v1/providers/:id/access/:crab_id",
            delete(providers::revoke),
        )
        .route("/v1/tides", get(tides::list))
        .route("/v1/auth/login", post(session::login))
        .route("/v1/auth/logout", post(session::logout))
        .route("/v1/auth/me", get(session::me))
        .fallback(agent_ui::fallback)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "shellgate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
