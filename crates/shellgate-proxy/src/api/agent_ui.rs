//! HTTP relay to agent UIs.
//!
//! `/agents/{name}/...` is forwarded to the agent's UI port on the host named
//! after the agent. Requests and responses stream through; hop-by-hop
//! headers are dropped both ways and the gateway's own session cookie never
//! reaches the agent. WebSocket upgrades on the same paths never get here;
//! the listener relays them at the socket level.

use super::error::{not_found, ApiError, ApiResult};
use super::extract::{session_token, SessionRejection};
use crate::state::{AppState, GatewayState};
use crate::upgrade::{agent_name, AGENT_UI_PREFIX};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONNECTION, CONTENT_LENGTH, COOKIE, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use futures::StreamExt;
use serde_json::json;
use shellgate::audit::{self, AuditMode};
use shellgate::auth::SESSION_COOKIE;
use shellgate::store::AgentStore;
use shellgate::GatewayError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const BODY_CHANNEL_DEPTH: usize = 16;

/// Router fallback: agent UI paths are relayed, anything else is a 404.
pub async fn fallback(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let Some(name) = agent_name(&path) else {
        return not_found("Not found").into_response();
    };

    let jar = CookieJar::from_headers(req.headers());
    if let Err(e) = state
        .admin
        .check_session(&*state.store, session_token(&jar))
        .await
    {
        return SessionRejection::new(e, state.config.secure_cookies).into_response();
    }

    match relay(&state, name, &path, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn relay(state: &GatewayState, name: &str, path: &str, req: Request) -> ApiResult<Response> {
    let crab = state.store.find_crab_by_name(name).await?;
    let Some((crab, port)) = crab.and_then(|c| c.ui_port.map(|port| (c, port))) else {
        return Err(not_found(format!("No UI configured for agent \"{}\"", name)));
    };
    if !crab.active {
        return Err(ApiError(GatewayError::Forbidden(format!(
            "Agent \"{}\" is revoked",
            name
        ))));
    }

    let host = state.config.agent_ui_host(&crab.name);
    let rest = &path[AGENT_UI_PREFIX.len() + name.len()..];
    let rest = if rest.is_empty() { "/" } else { rest };
    let query = req
        .uri()
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let target = format!("http://{}:{}{}{}", host, port, rest, query);

    let (parts, body) = req.into_parts();
    let has_body = parts.headers.contains_key(CONTENT_LENGTH)
        || parts.headers.contains_key(TRANSFER_ENCODING);
    let mut request = state
        .http
        .request(parts.method, target)
        .headers(forward_request_headers(&parts.headers));
    if has_body {
        request = request.body(stream_body(body));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("Agent UI upstream error for {}: {}", name, e.without_url());
            audit::log_denied(AuditMode::AgentUi, &host, port, Some(name), 502, "upstream unavailable");
            return Ok((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "Agent UI unavailable" })),
            )
                .into_response());
        }
    };

    let status = response.status();
    audit::log_allowed(AuditMode::AgentUi, &host, port, Some(name), status.as_u16());
    let headers = strip_hop_by_hop(response.headers());
    let mut out = Response::new(Body::from_stream(response.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    Ok(out)
}

/// Copy `headers` minus hop-by-hop headers and any header the
/// `Connection` header names.
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let named: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || named.iter().any(|n| n == lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Request headers for the agent: hop-by-hop and `Host` removed, and the
/// gateway session dropped from `Cookie`.
fn forward_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = strip_hop_by_hop(headers);
    out.remove(HOST);

    let cookies: Vec<String> = out
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .flatten()
        .filter(|c| c.name() != SESSION_COOKIE)
        .map(|c| c.stripped().to_string())
        .collect();
    out.remove(COOKIE);
    if !cookies.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&cookies.join("; ")) {
            out.insert(COOKIE, value);
        }
    }
    out
}

/// Pipe the inbound body into the outbound request without buffering it.
fn stream_body(body: Body) -> reqwest::Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, axum::Error>>(BODY_CHANNEL_DEPTH);
    tokio::spawn(async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });
    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}
