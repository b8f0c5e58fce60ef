//! WebSocket relay to agent UIs.
//!
//! Upgrade requests on `/agents/{name}/...` are intercepted before routing.
//! The session cookie is checked here because no route handler ever sees
//! the request. Once the agent resolves, the original head is replayed
//! verbatim to the agent's UI port and the two sockets are spliced; the
//! WebSocket handshake itself happens end to end.

use crate::connect::connect_upstream;
use crate::error::Result;
use crate::head::{reason_phrase, write_status, RawHead};
use crate::relay::relay;
use crate::state::GatewayState;
use shellgate::audit::{self, AuditMode};
use shellgate::auth;
use shellgate::store::AgentStore;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::error;

/// Prefix of agent UI paths.
pub const AGENT_UI_PREFIX: &str = "/agents/";

/// Agent name addressed by an `/agents/{name}/...` path.
#[must_use]
pub fn agent_name(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(AGENT_UI_PREFIX)?;
    let name = rest.split('/').next()?;
    (!name.is_empty()).then_some(name)
}

/// Relay a WebSocket upgrade whose head has already been read.
pub async fn handle_upgrade(
    state: &GatewayState,
    head: &RawHead,
    mut client: TcpStream,
    buffered: Vec<u8>,
) -> Result<()> {
    let Some(name) = agent_name(head.path()) else {
        write_status(&mut client, 404, "Not Found", &[]).await?;
        return Ok(());
    };

    let token = head.header("cookie").and_then(auth::session_token);
    if let Err(e) = state
        .admin
        .check_session(&*state.store, token.as_deref())
        .await
    {
        let status = e.status();
        audit::log_denied(AuditMode::WebSocket, name, 0, None, status, &e.to_string());
        write_status(&mut client, status, reason_phrase(status), &[]).await?;
        return Ok(());
    }

    let crab = match state.store.find_crab_by_name(name).await {
        Ok(Some(crab)) if crab.active => crab,
        Ok(_) => {
            audit::log_denied(AuditMode::WebSocket, name, 0, None, 404, "unknown or revoked agent");
            write_status(&mut client, 404, "Not Found", &[]).await?;
            return Ok(());
        }
        Err(e) => {
            error!("Agent lookup failed for WebSocket relay: {}", e);
            write_status(&mut client, 500, "Internal Server Error", &[]).await?;
            return Ok(());
        }
    };
    let Some(port) = crab.ui_port else {
        audit::log_denied(AuditMode::WebSocket, name, 0, None, 404, "no UI configured");
        write_status(&mut client, 404, "Not Found", &[]).await?;
        return Ok(());
    };

    let host = state.config.agent_ui_host(&crab.name);
    let mut upstream = match connect_upstream(&host, port, state.config.connect_timeout()).await {
        Ok(upstream) => upstream,
        Err(failure) => {
            let status = failure.status();
            audit::log_denied(AuditMode::WebSocket, &host, port, Some(&crab.name), status, failure.marker());
            write_status(&mut client, status, reason_phrase(status), &[]).await?;
            return Ok(());
        }
    };

    audit::log_allowed(AuditMode::WebSocket, &host, port, Some(&crab.name), 101);
    upstream.write_all(&head.raw).await?;
    if !buffered.is_empty() {
        upstream.write_all(&buffered).await?;
    }
    relay(client, upstream, &format!("websocket {}", crab.name)).await;
    Ok(())
}
