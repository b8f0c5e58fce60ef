//! HTTP CONNECT tunnel handler.
//!
//! Handles `CONNECT host:port HTTP/1.1` requests by:
//! 1. Resolving the caller's identity from `Proxy-Authorization` (optional)
//! 2. Evaluating the domain policy for that identity
//! 3. Establishing a TCP connection to the upstream
//! 4. Returning `200 Connection Established`
//! 5. Relaying bytes bidirectionally (transparent TLS tunnel)
//!
//! The gateway never terminates TLS; it just passes encrypted bytes through.
//! One tide is written per tunnel, when it is denied, fails or is
//! established. Byte-level traffic is not summarized.

use crate::error::{ProxyError, Result};
use crate::head::{reason_phrase, write_status, RawHead};
use crate::relay::relay;
use crate::state::GatewayState;
use shellgate::audit::{self, AuditMode};
use shellgate::model::NewTide;
use shellgate::{auth, policy};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error};

/// Header explaining why the gateway refused or failed a tunnel.
pub const POLICY_HEADER: &str = "X-Shellgate";

const TUNNEL_TOOL: &str = "CONNECT";

/// Why an upstream TCP connection could not be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    /// Name resolution failed or returned nothing.
    HostNotFound,
    /// Every address refused the connection.
    Refused,
    /// Any other connect error.
    Failed(String),
    /// The connect phase exceeded its timeout.
    TimedOut,
}

impl ConnectFailure {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            ConnectFailure::TimedOut => 504,
            _ => 502,
        }
    }

    /// Short reason sent in [`POLICY_HEADER`] and stored on the tide.
    #[must_use]
    pub fn marker(&self) -> &'static str {
        match self {
            ConnectFailure::HostNotFound => "Host not found",
            ConnectFailure::Refused => "Connection refused",
            ConnectFailure::Failed(_) => "Upstream connection failed",
            ConnectFailure::TimedOut => "Upstream connection timed out",
        }
    }
}

/// Handle an HTTP CONNECT request whose head has already been read.
///
/// `buffered` holds any bytes the client sent after the head; they are
/// forwarded once the tunnel is open.
pub async fn handle_connect(
    state: &GatewayState,
    head: &RawHead,
    mut client: TcpStream,
    buffered: Vec<u8>,
) -> Result<()> {
    let (host, port) = match parse_connect_target(&head.target) {
        Ok(target) => target,
        Err(e) => {
            write_status(&mut client, 400, "Bad Request", &[]).await?;
            return Err(e);
        }
    };
    debug!("CONNECT request to {}:{}", host, port);

    let store = &*state.store;
    let crab = auth::resolve_tunnel_identity(store, head.header("proxy-authorization")).await;
    let crab_id = crab.as_ref().map(|c| c.id.clone());
    let agent = crab.as_ref().map(|c| c.name.as_str());
    let target = format!("{}:{}", host, port);

    let decision = match policy::evaluate(store, &host, crab_id.as_deref()).await {
        Ok(decision) => decision,
        Err(e) => {
            error!("Policy evaluation failed for {}: {}", target, e);
            write_status(&mut client, 500, "Internal Server Error", &[]).await?;
            return Ok(());
        }
    };

    let tide = NewTide {
        crab_id,
        tool: TUNNEL_TOOL.to_string(),
        target_url: Some(target.clone()),
        method: Some(TUNNEL_TOOL.to_string()),
        ..NewTide::default()
    };

    if !decision.is_allowed() {
        audit::log_denied(AuditMode::Connect, &host, port, agent, 403, &decision.reason());
        audit::record(
            store,
            NewTide {
                status_code: Some(403),
                error: Some(format!("CONNECT to {} blocked by domain policy", target)),
                ..tide
            },
        )
        .await;
        write_status(
            &mut client,
            403,
            "Forbidden",
            &[(POLICY_HEADER, "domain blocked by policy")],
        )
        .await?;
        return Ok(());
    }

    let mut upstream =
        match connect_upstream(&host, port, state.config.connect_timeout()).await {
            Ok(upstream) => upstream,
            Err(failure) => {
                let status = failure.status();
                audit::log_denied(AuditMode::Connect, &host, port, agent, status, failure.marker());
                audit::record(
                    store,
                    NewTide {
                        status_code: Some(status),
                        error: Some(failure.marker().to_string()),
                        ..tide
                    },
                )
                .await;
                write_status(
                    &mut client,
                    status,
                    reason_phrase(status),
                    &[(POLICY_HEADER, failure.marker())],
                )
                .await?;
                return Ok(());
            }
        };

    audit::log_allowed(AuditMode::Connect, &host, port, agent, 200);
    audit::record(
        store,
        NewTide {
            status_code: Some(200),
            ..tide
        },
    )
    .await;

    write_status(&mut client, 200, "Connection Established", &[]).await?;
    if !buffered.is_empty() {
        upstream.write_all(&buffered).await?;
    }
    relay(client, upstream, &target).await;
    Ok(())
}

/// Resolve `host` and connect to the first address that accepts, all
/// within `timeout`.
pub async fn connect_upstream(
    host: &str,
    port: u16,
    timeout: Duration,
) -> std::result::Result<TcpStream, ConnectFailure> {
    tokio::time::timeout(timeout, async {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| {
                debug!("Resolving {} failed: {}", host, e);
                ConnectFailure::HostNotFound
            })?
            .collect();
        connect_to_resolved(&addrs).await
    })
    .await
    .map_err(|_| ConnectFailure::TimedOut)?
}

/// Connect to one of the resolved socket addresses.
///
/// Tries each address in order until one succeeds.
async fn connect_to_resolved(
    addrs: &[SocketAddr],
) -> std::result::Result<TcpStream, ConnectFailure> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        None => ConnectFailure::HostNotFound,
        Some(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => ConnectFailure::Refused,
        Some(e) => ConnectFailure::Failed(e.to_string()),
    })
}

/// Parse the target host and port from a CONNECT request target.
///
/// Expected format: `host:port`. A missing port defaults to 443; IPv6
/// literals are written `[addr]:port`.
pub fn parse_connect_target(authority: &str) -> Result<(String, u16)> {
    let authority = authority.trim();
    if authority.is_empty() || authority.contains('/') {
        return Err(ProxyError::HttpParse(format!(
            "malformed CONNECT target: {}",
            authority
        )));
    }

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| {
            ProxyError::HttpParse(format!("malformed CONNECT target: {}", authority))
        })?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => {
                return Err(ProxyError::HttpParse(format!(
                    "malformed CONNECT target: {}",
                    authority
                )))
            }
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(ProxyError::HttpParse(format!(
            "missing host in CONNECT target: {}",
            authority
        )));
    }
    let port = match port {
        Some(p) => p.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
            ProxyError::HttpParse(format!("invalid port in CONNECT: {}", authority))
        })?,
        // No port specified, default to 443 for CONNECT
        None => 443,
    };
    Ok((host.to_string(), port))
}
