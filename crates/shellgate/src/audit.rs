//! Audit trail.
//!
//! Two outputs for every gateway decision:
//! - a structured `tracing` event under the `shellgate::audit` target
//! - one row in the store's append-only tide table
//!
//! Writing the row never fails the operation being audited. Secrets, tokens
//! and cookies never reach either output; bodies pass through
//! [`sanitize_body`] before they are stored.

use crate::error::Result;
use crate::model::NewTide;
use crate::settings;
use crate::store::{AuditStore, SettingStore};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

/// Stored bodies are capped at this many bytes.
pub const MAX_BODY_BYTES: usize = 4096;

const TRUNCATION_MARKER: &str = "…[truncated]";
const REDACTED_BODY: &str = "[REDACTED]";

static SECRET_FIELD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)(["']?(?:token|key|secret|password|api_key)["']?\s*:\s*["'])[^"']{6,}(["'])"#)
        .ok()
});

/// Gateway path that produced an audit event.
#[derive(Debug, Clone, Copy)]
pub enum AuditMode {
    /// CONNECT tunnel
    Connect,
    /// Single-shot credential-injected call
    Execute,
    /// Model provider passthrough
    Model,
    /// Agent UI HTTP relay
    AgentUi,
    /// Agent UI WebSocket relay
    WebSocket,
}

impl std::fmt::Display for AuditMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditMode::Connect => write!(f, "connect"),
            AuditMode::Execute => write!(f, "execute"),
            AuditMode::Model => write!(f, "model"),
            AuditMode::AgentUi => write!(f, "agent_ui"),
            AuditMode::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Log an allowed request.
pub fn log_allowed(mode: AuditMode, host: &str, port: u16, agent: Option<&str>, status: u16) {
    info!(
        target: "shellgate::audit",
        mode = %mode,
        host = host,
        port = port,
        agent = agent.unwrap_or("anonymous"),
        decision = "allow",
        status = status,
        "gateway request allowed"
    );
}

/// Log a denied or failed request.
pub fn log_denied(
    mode: AuditMode,
    host: &str,
    port: u16,
    agent: Option<&str>,
    status: u16,
    reason: &str,
) {
    info!(
        target: "shellgate::audit",
        mode = %mode,
        host = host,
        port = port,
        agent = agent.unwrap_or("anonymous"),
        decision = "deny",
        status = status,
        reason = reason,
        "gateway request denied"
    );
}

/// Append a tide, logging and swallowing any store failure.
pub async fn record<S: AuditStore + ?Sized>(store: &S, tide: NewTide) {
    let tool = tide.tool.clone();
    if let Err(e) = store.append_tide(tide).await {
        warn!("Failed to write audit row for {}: {}", tool, e);
    }
}

/// Delete tides older than the retention window.
///
/// Returns the number of rows removed; a window of `0` keeps everything.
pub async fn prune<S: AuditStore + SettingStore + ?Sized>(store: &S) -> Result<usize> {
    prune_at(store, Utc::now()).await
}

/// [`prune`] as of `now`.
pub async fn prune_at<S: AuditStore + SettingStore + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
) -> Result<usize> {
    let days = settings::retention_days(store).await?;
    if days == 0 {
        return Ok(0);
    }
    let days = i64::try_from(days).unwrap_or(i64::MAX);
    let cutoff = Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let removed = store.prune_tides(cutoff).await?;
    if removed > 0 {
        info!(
            "Pruned {} audit row(s) older than {} day(s)",
            removed, days
        );
    }
    Ok(removed)
}

/// Redact secret-looking JSON fields, then cap at [`MAX_BODY_BYTES`].
///
/// Redaction runs on the whole body so a value cut by the cap is never
/// stored half-visible.
#[must_use]
pub fn sanitize_body(body: &str) -> String {
    let redacted = redact(body);
    if redacted.len() <= MAX_BODY_BYTES {
        return redacted;
    }
    let mut end = MAX_BODY_BYTES;
    while !redacted.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &redacted[..end], TRUNCATION_MARKER)
}

/// Replace values of `token` / `key` / `secret` / `password` / `api_key`
/// fields with `[REDACTED]`.
#[must_use]
pub fn redact(text: &str) -> String {
    match SECRET_FIELD.as_ref() {
        Some(re) => re.replace_all(text, "${1}[REDACTED]${2}").into_owned(),
        // Fail closed: without the pattern nothing can be vetted.
        None => REDACTED_BODY.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::model::{Tide, TidePage, TideQuery};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    #[test]
    fn test_redacts_secret_fields() {
        let body = r#"{"access_token":"ghp_1234567890","user":"octo","password": "hunter22"}"#;
        let out = sanitize_body(body);
        assert!(!out.contains("ghp_1234567890"));
        assert!(!out.contains("hunter22"));
        assert!(out.contains(r#""access_token":"[REDACTED]""#));
        assert!(out.contains("octo"));
    }

    #[test]
    fn test_short_values_kept() {
        let out = sanitize_body(r#"{"key":"abc"}"#);
        assert_eq!(out, r#"{"key":"abc"}"#);
    }

    #[test]
    fn test_case_insensitive_and_single_quotes() {
        let out = sanitize_body("{'API_KEY': 'sk-live-abcdef'}");
        assert_eq!(out, "{'API_KEY': '[REDACTED]'}");
    }

    #[test]
    fn test_caps_length() {
        let body = "a".repeat(MAX_BODY_BYTES + 100);
        let out = sanitize_body(&body);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.len(), MAX_BODY_BYTES + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_secret_across_cap_is_redacted() {
        let body = format!(
            r#"{{"f":"{}","token":"ghp_SUPERSECRETVALUE_0123456789","g":"{}"}}"#,
            "x".repeat(MAX_BODY_BYTES - 40),
            "y".repeat(100)
        );
        assert!(body.len() > MAX_BODY_BYTES);
        let out = sanitize_body(&body);
        assert!(!out.contains("ghp_SUPER"));
        assert!(out.contains(r#""token":"[REDACTED]""#));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_caps_on_char_boundary() {
        let body = "é".repeat(MAX_BODY_BYTES);
        let out = sanitize_body(&body);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(out.len() <= MAX_BODY_BYTES + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn test_prune_disabled_by_default() {
        let store = MemoryStore::new();
        store.append_tide(NewTide::default()).await.unwrap();
        let removed = prune_at(&store, Utc::now() + Duration::days(365)).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_prune_respects_window() {
        let store = MemoryStore::new();
        store
            .set_setting(settings::AUDIT_LOG_RETENTION_DAYS, "7")
            .await
            .unwrap();
        store.append_tide(NewTide::default()).await.unwrap();

        assert_eq!(prune_at(&store, Utc::now() + Duration::days(6)).await.unwrap(), 0);
        assert_eq!(prune_at(&store, Utc::now() + Duration::days(8)).await.unwrap(), 1);
    }

    struct FailingAudit;

    #[async_trait]
    impl AuditStore for FailingAudit {
        async fn append_tide(&self, _tide: NewTide) -> Result<Tide> {
            Err(GatewayError::Store("disk full".into()))
        }
        async fn list_tides(&self, _query: TideQuery) -> Result<TidePage> {
            Err(GatewayError::Store("disk full".into()))
        }
        async fn prune_tides(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
            Err(GatewayError::Store("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_record_swallows_store_failure() {
        record(
            &FailingAudit,
            NewTide {
                tool: "CONNECT".into(),
                ..NewTide::default()
            },
        )
        .await;
    }
}
