//! Shared state handed to every connection and route.

use crate::config::{GatewayConfig, GatewaySecrets};
use crate::error::{ProxyError, Result};
use shellgate::auth::AdminAuth;
use shellgate::ratelimit::RateLimiter;
use shellgate::ssrf::{Resolver, SsrfGuard};
use shellgate::vault::Vault;
use shellgate::Store;
use std::sync::Arc;

/// Everything a request needs. Holds no business state of its own; agents,
/// rules and secrets are re-read from the store on every decision.
pub struct GatewayState {
    pub store: Arc<dyn Store>,
    pub vault: Vault,
    pub admin: AdminAuth,
    pub ssrf: SsrfGuard,
    pub limiter: RateLimiter,
    pub config: GatewayConfig,
    /// Client for execute, model and agent UI calls. Redirects are not
    /// followed, so a 3xx cannot steer a call past the SSRF check.
    pub http: reqwest::Client,
}

/// State as shared between tasks.
pub type AppState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(config: GatewayConfig, secrets: GatewaySecrets, store: Arc<dyn Store>) -> Result<Self> {
        let http = default_client()?;
        Ok(Self {
            store,
            vault: Vault::new(secrets.master_key),
            admin: AdminAuth::new(secrets.admin_key)?,
            ssrf: SsrfGuard::default(),
            limiter: RateLimiter::per_minute(config.rate_limit_per_minute),
            config,
            http,
        })
    }

    /// Replace the outbound HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Replace the resolver used by the SSRF guard.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.ssrf = SsrfGuard::new(resolver);
        self
    }

    #[must_use]
    pub fn shared(self) -> AppState {
        Arc::new(self)
    }
}

/// Outbound client without redirects or a global timeout; each call site
/// applies its own timeout.
pub fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ProxyError::Config(format!("HTTP client: {}", e)))
}
