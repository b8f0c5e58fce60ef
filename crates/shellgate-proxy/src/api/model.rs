//! Model proxy: an OpenAI-compatible chat completions passthrough.
//!
//! The agent never names a target. The gateway picks the provider the agent
//! may use, attaches the provider's credential as a bearer token when one
//! is stored, and forwards the body verbatim. Streaming responses are relayed
//! chunk by chunk while a capped copy is kept for the tide.

use super::error::{invalid, ApiResult};
use super::execute::{host_port, upstream_error};
use super::extract::Agent;
use crate::state::{AppState, GatewayState};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde_json::Value;
use shellgate::audit::{self, sanitize_body, AuditMode, MAX_BODY_BYTES};
use shellgate::injector::{inject, Injection, GATEWAY_USER_AGENT};
use shellgate::model::{Crab, ModelProvider, NewTide};
use shellgate::provider::{completions_url, provider_credential, select_provider};
use shellgate::store::{AuditStore, ProviderStore};
use shellgate::{GatewayError, Store};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Chunks buffered between the upstream reader and the client.
const STREAM_CHANNEL_DEPTH: usize = 16;

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    Agent(crab): Agent,
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Response> {
    let payload: Value =
        serde_json::from_slice(&body).map_err(|_| invalid("Request body must be valid JSON"))?;
    let streaming = payload.get("stream").and_then(Value::as_bool) == Some(true);

    let provider = choose_provider(&*state.store, &crab).await?;
    let url = completions_url(&provider);

    // One deadline covers the whole non-streaming exchange.
    let deadline = Instant::now() + state.config.model_timeout();
    let response = match send(&state, &crab, &provider, &url, body, deadline).await {
        Ok(response) => response,
        Err(e) => return Err(fail(&*state.store, &crab, Some((&provider, &url)), e).await.into()),
    };

    let status = response.status().as_u16();
    let content_type = response.headers().get(CONTENT_TYPE).cloned();
    let (host, port) = host_port(&url);
    audit::log_allowed(AuditMode::Model, &host, port, Some(&crab.name), status);

    let mut tide = NewTide {
        crab_id: Some(crab.id.clone()),
        tool: provider.name.clone(),
        target_url: Some(url.clone()),
        method: Some("POST".to_string()),
        status_code: Some(status),
        ..NewTide::default()
    };

    let body = if streaming {
        Body::from_stream(ReceiverStream::new(relay_stream(
            Arc::clone(&state.store),
            response,
            tide,
        )))
    } else {
        let bytes = match timeout_at(deadline, response.bytes()).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                let e = upstream_error(e);
                return Err(fail(&*state.store, &crab, Some((&provider, &url)), e).await.into());
            }
            Err(_) => {
                let e = GatewayError::UpstreamTimeout;
                return Err(fail(&*state.store, &crab, Some((&provider, &url)), e).await.into());
            }
        };
        tide.response_body = Some(sanitize_body(&String::from_utf8_lossy(&bytes)));
        audit::record(&*state.store, tide).await;
        Body::from(bytes)
    };

    let mut out = (
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
        body,
    )
        .into_response();
    if let Some(content_type) = content_type {
        out.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    Ok(out)
}

/// Provider the agent may use. A miss or a store failure leaves a tide.
async fn choose_provider<S>(store: &S, crab: &Crab) -> Result<ModelProvider, GatewayError>
where
    S: ProviderStore + AuditStore + ?Sized,
{
    match select_provider(store, &crab.id).await {
        Ok(Some(provider)) => Ok(provider),
        Ok(None) => Err(fail(store, crab, None, GatewayError::NoProvider).await),
        Err(e) => Err(fail(store, crab, None, e).await),
    }
}

/// Build and send the upstream request; response headers must arrive
/// before `deadline`.
async fn send(
    state: &GatewayState,
    crab: &Crab,
    provider: &ModelProvider,
    url: &str,
    body: Bytes,
    deadline: Instant,
) -> Result<reqwest::Response, GatewayError> {
    let headers = match provider_credential(&*state.store, provider, &crab.id).await? {
        Some(pearl) => {
            let key = state.vault.decrypt(&pearl.sealed)?;
            inject(url, &key, &Injection::default())?.headers
        }
        None => {
            let mut headers = http::HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(
                http::header::USER_AGENT,
                HeaderValue::from_static(GATEWAY_USER_AGENT),
            );
            headers
        }
    };

    let request = state.http.post(url).headers(headers).body(body);
    match timeout_at(deadline, request.send()).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(upstream_error(e)),
        Err(_) => Err(GatewayError::UpstreamTimeout),
    }
}

/// Record the tide for a failed call and hand the error back.
async fn fail<S: AuditStore + ?Sized>(
    store: &S,
    crab: &Crab,
    target: Option<(&ModelProvider, &str)>,
    e: GatewayError,
) -> GatewayError {
    let (host, port) = target.map_or((String::new(), 0), |(_, url)| host_port(url));
    audit::log_denied(
        AuditMode::Model,
        &host,
        port,
        Some(&crab.name),
        e.status(),
        &e.public_message(),
    );
    audit::record(
        store,
        NewTide {
            crab_id: Some(crab.id.clone()),
            tool: target.map_or_else(|| "model".to_string(), |(p, _)| p.name.clone()),
            target_url: target.map(|(_, url)| url.to_string()),
            method: Some("POST".to_string()),
            status_code: Some(e.status()),
            error: Some(e.public_message()),
            ..NewTide::default()
        },
    )
    .await;
    e
}

/// Pump the upstream body into a bounded channel, keeping a capped copy for
/// the tide, which is written once the stream ends.
fn relay_stream(
    store: Arc<dyn Store>,
    response: reqwest::Response,
    mut tide: NewTide,
) -> mpsc::Receiver<Result<Bytes, std::io::Error>> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_DEPTH);
    tokio::spawn(async move {
        let mut captured: Vec<u8> = Vec::new();
        let mut upstream = response.bytes_stream();
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    let room = (MAX_BODY_BYTES + 1).saturating_sub(captured.len());
                    captured.extend_from_slice(&bytes[..bytes.len().min(room)]);
                    if tx.send(Ok(bytes)).await.is_err() {
                        debug!("Model stream client went away");
                        tide.error = Some("Client disconnected".to_string());
                        break;
                    }
                }
                Err(e) => {
                    let message = upstream_error(e).public_message();
                    tide.error = Some(message.clone());
                    let _ = tx.send(Err(std::io::Error::other(message))).await;
                    break;
                }
            }
        }
        tide.response_body = Some(sanitize_body(&String::from_utf8_lossy(&captured)));
        audit::record(&*store, tide).await;
    });
    rx
}
