//! Gateway server: TCP listener, connection dispatch, and lifecycle.
//!
//! The server binds the configured address, accepts TCP connections, reads
//! the request head itself to determine the mode, and dispatches:
//!
//! CONNECT method                  -> [`connect`] tunnel
//! WebSocket upgrade on `/agents/` -> [`upgrade`] relay
//! Anything else                   -> the axum router from [`api`]
//!
//! Router connections are served without keep-alive so every request on the
//! socket passes through this dispatch.

use crate::api;
use crate::connect;
use crate::error::{ProxyError, Result};
use crate::head::{read_head, write_status};
use crate::rewind::Rewind;
use crate::state::AppState;
use crate::upgrade::{self, agent_name};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use shellgate::audit;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle returned when the gateway starts.
///
/// Drop the handle or call [`shutdown`](Self::shutdown) to stop accepting
/// connections and stop the retention pruner. Established tunnels run
/// until either side closes.
pub struct GatewayHandle {
    /// The actual address the gateway is listening on
    pub addr: SocketAddr,
    /// Send `true` to trigger graceful shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl GatewayHandle {
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Signal the gateway to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Start the gateway.
///
/// Binds to `config.bind_addr:config.bind_port` (port 0 = OS-assigned) and
/// begins accepting connections. The retention pruner starts only after the
/// listener is bound, and its first sweep waits one full interval.
pub async fn start(state: AppState) -> Result<GatewayHandle> {
    let bind_addr = state.config.bind_socket();
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ProxyError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;
    let addr = listener.local_addr().map_err(|e| ProxyError::Bind {
        addr: bind_addr.to_string(),
        source: e,
    })?;

    info!("Gateway listening on {}", addr);
    if !state.admin.is_configured() {
        warn!("No admin API key configured; admin routes will answer 500");
    }
    if !state.vault.is_configured() {
        warn!("No usable master key configured; secret routes will answer 500");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let router = api::router(Arc::clone(&state));

    tokio::spawn(accept_loop(
        listener,
        Arc::clone(&state),
        router,
        shutdown_rx.clone(),
    ));
    tokio::spawn(retention_loop(state, shutdown_rx));

    Ok(GatewayHandle { addr, shutdown_tx })
}

/// Accept loop: listen for connections until shutdown.
async fn accept_loop(
    listener: TcpListener,
    state: AppState,
    router: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let active = Arc::new(AtomicUsize::new(0));
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        // Connection limit enforcement
                        let max = state.config.max_connections;
                        if max > 0 {
                            let current = active.load(Ordering::Relaxed);
                            if current >= max {
                                warn!("Connection limit reached ({}/{}), rejecting {}", current, max, addr);
                                drop(stream);
                                continue;
                            }
                        }
                        active.fetch_add(1, Ordering::Relaxed);

                        debug!("Accepted connection from {}", addr);
                        let state = Arc::clone(&state);
                        let router = router.clone();
                        let active = Arc::clone(&active);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &state, router).await {
                                debug!("Connection handler error: {}", e);
                            }
                            active.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Gateway shutting down");
                    return;
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(mut stream: TcpStream, state: &AppState, router: Router) -> Result<()> {
    // Keep the BufReader alive until the whole head is consumed; anything
    // it read past the head is collected from its buffer afterwards.
    let mut reader = BufReader::new(&mut stream);
    let head = match read_head(&mut reader).await {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(()), // Client disconnected
        Err(e @ ProxyError::HeaderTooLarge { .. }) => {
            drop(reader);
            write_status(&mut stream, 431, "Request Header Fields Too Large", &[]).await?;
            return Err(e);
        }
        Err(e) => {
            drop(reader);
            write_status(&mut stream, 400, "Bad Request", &[]).await?;
            return Err(e);
        }
    };
    let buffered = reader.buffer().to_vec();
    drop(reader);

    if head.is_connect() {
        return connect::handle_connect(state, &head, stream, buffered).await;
    }
    if head.is_websocket_upgrade() && agent_name(head.path()).is_some() {
        return upgrade::handle_upgrade(state, &head, stream, buffered).await;
    }

    let mut prefix = head.raw;
    prefix.extend_from_slice(&buffered);
    let io = TokioIo::new(Rewind::new(stream, prefix));
    http1::Builder::new()
        .keep_alive(false)
        .serve_connection(io, TowerToHyperService::new(router))
        .await?;
    Ok(())
}

/// Periodic audit retention sweep. Runs one sweep at a time; the first
/// happens one interval after startup.
async fn retention_loop(state: AppState, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(state.config.retention_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = audit::prune(&*state.store).await {
                    warn!("Audit retention sweep failed: {}", e);
                }
                state.limiter.sweep(Instant::now());
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, GatewaySecrets};
    use crate::state::GatewayState;
    use shellgate::MemoryStore;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn local_state() -> AppState {
        let config = GatewayConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            bind_port: 0,
            ..GatewayConfig::default()
        };
        GatewayState::new(config, GatewaySecrets::default(), Arc::new(MemoryStore::new()))
            .unwrap()
            .shared()
    }

    async fn exchange(port: u16, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_gateway_starts_and_binds() {
        let handle = start(local_state()).await.unwrap();
        assert!(handle.port() > 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_health_served_through_router() {
        let handle = start(local_state()).await.unwrap();
        let response = exchange(
            handle.port(),
            b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"status\":\"ok\""));
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_connect_gets_400() {
        let handle = start(local_state()).await.unwrap();
        let response = exchange(handle.port(), b"CONNECT host:notaport HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400"));
        handle.shutdown();
    }
}
