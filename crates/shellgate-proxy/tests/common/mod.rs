//! Shared fixtures for the gateway integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use shellgate::model::{Crab, NewCrab, PearlUpsert, Tide, TideQuery, ToolGrant};
use shellgate::ssrf::Resolver;
use shellgate::store::{AgentStore, AuditStore, VaultStore};
use shellgate::MemoryStore;
use shellgate_proxy::{api, AppState, GatewayConfig, GatewaySecrets, GatewayState};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;
use zeroize::Zeroizing;

pub const ADMIN_KEY: &str = "admin-key-for-tests";

/// Hostname the fake upstream is reachable under.
pub const UPSTREAM_HOST: &str = "api.example.test";

pub fn master_key() -> Zeroizing<String> {
    Zeroizing::new("5e".repeat(32))
}

pub fn local_config() -> GatewayConfig {
    GatewayConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        bind_port: 0,
        ..GatewayConfig::default()
    }
}

/// Resolves every name to a public address, so the SSRF guard lets the
/// fake upstream through.
pub struct PublicResolver;

#[async_trait]
impl Resolver for PublicResolver {
    async fn resolve(&self, _host: &str) -> std::io::Result<Vec<IpAddr>> {
        Ok(vec![IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))])
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(local_config(), None)
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self::build(config, None)
    }

    /// Gateway whose outbound client sends `UPSTREAM_HOST` to `upstream`.
    pub fn with_upstream(config: GatewayConfig, upstream: SocketAddr) -> Self {
        Self::build(config, Some(upstream))
    }

    fn build(config: GatewayConfig, upstream: Option<SocketAddr>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let secrets = GatewaySecrets {
            master_key: Some(master_key()),
            admin_key: Some(Zeroizing::new(ADMIN_KEY.to_string())),
        };
        let mut state = GatewayState::new(config, secrets, store.clone()).unwrap();
        if let Some(upstream) = upstream {
            let client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .resolve(UPSTREAM_HOST, SocketAddr::new(upstream.ip(), 0))
                .build()
                .unwrap();
            state = state
                .with_http_client(client)
                .with_resolver(Arc::new(PublicResolver));
        }
        Self {
            store,
            state: state.shared(),
        }
    }

    pub fn router(&self) -> Router {
        api::router(Arc::clone(&self.state))
    }

    /// Register an agent directly in the store; returns it with its token.
    pub async fn agent(&self, name: &str, allowed_tools: Option<Vec<ToolGrant>>) -> (Crab, String) {
        let token = format!("token-{}", name);
        let crab = self
            .store
            .create_crab(
                NewCrab {
                    name: name.to_string(),
                    allowed_tools,
                    ..NewCrab::default()
                },
                token.clone(),
            )
            .await
            .unwrap();
        (crab, token)
    }

    pub async fn agent_with_ui(&self, name: &str, ui_port: u16) -> Crab {
        self.store
            .create_crab(
                NewCrab {
                    name: name.to_string(),
                    ui_port: Some(ui_port),
                    ..NewCrab::default()
                },
                format!("token-{}", name),
            )
            .await
            .unwrap()
    }

    /// Seal and store a credential for (agent, service).
    pub async fn pearl(&self, crab_id: &str, service: &str, secret: &str) {
        let sealed = self.state.vault.encrypt(secret).unwrap();
        self.store
            .upsert_pearl(PearlUpsert {
                crab_id: crab_id.to_string(),
                service: service.to_string(),
                label: None,
                sealed,
            })
            .await
            .unwrap();
    }

    /// Every tide, newest first.
    pub async fn tides(&self) -> Vec<Tide> {
        self.store
            .list_tides(TideQuery {
                crab_id: None,
                offset: 0,
                limit: 1000,
            })
            .await
            .unwrap()
            .tides
    }

    pub fn session_cookie(&self) -> String {
        format!("shellgate_session={}", self.state.admin.issue_session().unwrap())
    }
}

/// Drive one request through the router.
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, headers, body)
}

/// Admin request with a JSON body.
pub fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-api-key", ADMIN_KEY)
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Agent request with a JSON body.
pub fn agent_request(token: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Serve `app` on an ephemeral local port.
pub async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
