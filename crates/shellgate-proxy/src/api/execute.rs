//! Execute gateway: one credential-injected outbound call per request.
//!
//! The agent names a service and a target URL. The gateway checks the URL
//! against the SSRF deny list, finds the agent's credential for the
//! service, enforces the agent's tool allow-list, decrypts and injects the
//! credential, and performs the call. Exactly one tide is written for every
//! request that gets past authentication, the rate limit and JSON parsing,
//! whatever the outcome.

use super::error::{invalid, ApiResult};
use super::extract::Agent;
use crate::state::{AppState, GatewayState};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use shellgate::audit::{self, sanitize_body, AuditMode};
use shellgate::injector::{inject, AuthType, Injection};
use shellgate::model::{Crab, NewTide};
use shellgate::store::VaultStore;
use shellgate::GatewayError;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    service: Option<String>,
    url: Option<String>,
    /// Defaults to GET.
    method: Option<String>,
    /// Sent as JSON when present.
    body: Option<Value>,
    /// `bearer` (default), `basic`, `header` or `queryparam`.
    auth_type: Option<String>,
    auth_param_name: Option<String>,
}

struct Call<'a> {
    service: &'a str,
    url: &'a str,
    method: &'a str,
    body: Option<String>,
    auth_type: Option<String>,
    auth_param_name: Option<String>,
}

struct Upstream {
    status: u16,
    text: String,
}

/// `POST /v1/execute`
pub async fn execute(
    Agent(crab): Agent,
    State(state): State<AppState>,
    raw: Bytes,
) -> ApiResult<Response> {
    state.limiter.check(&crab.id)?;
    let req: ExecuteRequest = serde_json::from_slice(&raw)
        .map_err(|e| invalid(format!("Invalid JSON body: {}", e)))?;

    let service = req.service.filter(|s| !s.is_empty());
    let url = req.url.filter(|s| !s.is_empty());
    // Compared against allowedMethods exactly as sent.
    let method = req
        .method
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "GET".to_string());
    let body = req.body.filter(|b| !b.is_null()).map(|b| b.to_string());

    let mut tide = NewTide {
        crab_id: Some(crab.id.clone()),
        tool: service.clone().unwrap_or_else(|| "execute".to_string()),
        target_url: url.clone(),
        method: Some(method.clone()),
        request_body: body.as_deref().map(sanitize_body),
        ..NewTide::default()
    };

    let outcome = match (service.as_deref(), url.as_deref()) {
        (Some(service), Some(url)) => {
            let call = Call {
                service,
                url,
                method: &method,
                body,
                auth_type: req.auth_type,
                auth_param_name: req.auth_param_name,
            };
            perform(&state, &crab, call).await
        }
        _ => Err(GatewayError::InvalidInput(
            "service and url are required".to_string(),
        )),
    };

    let (host, port) = url.as_deref().map_or((String::new(), 0), host_port);
    match outcome {
        Ok(upstream) => {
            audit::log_allowed(AuditMode::Execute, &host, port, Some(&crab.name), upstream.status);
            tide.status_code = Some(upstream.status);
            tide.response_body = Some(sanitize_body(&upstream.text));
            audit::record(&*state.store, tide).await;

            let parsed = serde_json::from_str::<Value>(&upstream.text)
                .unwrap_or_else(|_| Value::String(upstream.text));
            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            Ok((
                status,
                Json(json!({ "statusCode": upstream.status, "body": parsed })),
            )
                .into_response())
        }
        Err(e) => {
            audit::log_denied(
                AuditMode::Execute,
                &host,
                port,
                Some(&crab.name),
                e.status(),
                &e.public_message(),
            );
            tide.status_code = Some(e.status());
            tide.error = Some(e.public_message());
            audit::record(&*state.store, tide).await;
            Err(e.into())
        }
    }
}

async fn perform(state: &GatewayState, crab: &Crab, call: Call<'_>) -> Result<Upstream, GatewayError> {
    let verdict = state.ssrf.check_url(call.url).await;
    if !verdict.is_safe() {
        debug!("Execute target rejected: {}", verdict.reason());
        return Err(GatewayError::InvalidInput(
            "Requests to internal addresses are not allowed".to_string(),
        ));
    }

    let pearl = state
        .store
        .find_pearl(&crab.id, call.service)
        .await?
        .ok_or_else(|| {
            GatewayError::NotFound(format!(
                "No credential found for service \"{}\". Register it via POST /v1/secrets.",
                call.service
            ))
        })?;

    if !crab.allows_tool(call.url, call.method) {
        return Err(GatewayError::Forbidden("Tool not allowed".to_string()));
    }

    let auth_type = call
        .auth_type
        .as_deref()
        .map(str::parse::<AuthType>)
        .transpose()?
        .unwrap_or_default();
    let secret = state.vault.decrypt(&pearl.sealed)?;
    let prepared = inject(
        call.url,
        &secret,
        &Injection::new(auth_type, call.auth_param_name),
    )?;

    let method = outbound_method(call.method)?;
    let mut request = state
        .http
        .request(method, prepared.url.as_str())
        .headers(prepared.headers)
        .timeout(state.config.execute_timeout());
    if let Some(body) = call.body {
        request = request.body(body);
    }

    let response = request.send().await.map_err(upstream_error)?;
    let status = response.status().as_u16();
    let text = response.text().await.map_err(upstream_error)?;
    Ok(Upstream { status, text })
}

/// Verbs sent upper-cased whatever case the agent used.
const NORMALIZED_METHODS: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT"];

/// Method for the outbound call. Other methods go out exactly as given.
fn outbound_method(method: &str) -> Result<reqwest::Method, GatewayError> {
    let normalized = NORMALIZED_METHODS
        .iter()
        .find(|m| m.eq_ignore_ascii_case(method))
        .copied()
        .unwrap_or(method);
    reqwest::Method::from_bytes(normalized.as_bytes())
        .map_err(|_| GatewayError::InvalidInput(format!("invalid method: {}", method)))
}

/// Classify a client error. The URL is dropped from the message because a
/// query-parameter credential would otherwise end up in logs and tides.
pub(crate) fn upstream_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::UpstreamTimeout
    } else {
        GatewayError::UpstreamFailure(e.without_url().to_string())
    }
}

/// Host and port of a URL for audit events.
pub(crate) fn host_port(url: &str) -> (String, u16) {
    match url::Url::parse(url) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or_default().to_string(),
            parsed.port_or_known_default().unwrap_or(0),
        ),
        Err(_) => (String::new(), 0),
    }
}
