//! Gateway configuration types.
//!
//! [`GatewayConfig`] is plain data read from a JSON file; every field has a
//! default so an empty object is a valid configuration. Key material never
//! comes from the file: [`GatewaySecrets`] reads it from the environment.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use zeroize::Zeroizing;

/// Environment variable holding the 64-hex-character master key.
pub const MASTER_KEY_ENV: &str = "SHELLGATE_MASTER_KEY";
/// Environment variable holding the admin API key.
pub const ADMIN_KEY_ENV: &str = "SHELLGATE_ADMIN_KEY";

/// Configuration for the gateway listener and its outbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address (default: 0.0.0.0)
    pub bind_addr: IpAddr,

    /// Bind port (0 = OS-assigned ephemeral port)
    pub bind_port: u16,

    /// Maximum concurrent connections (0 = unlimited).
    pub max_connections: usize,

    /// Total timeout for one execute call.
    pub execute_timeout_secs: u64,

    /// Timeout for a model provider call.
    pub model_timeout_secs: u64,

    /// Upstream TCP connect timeout for tunnels and UI relays.
    pub connect_timeout_secs: u64,

    /// Execute calls per agent per minute (0 = unlimited).
    pub rate_limit_per_minute: u32,

    /// Seconds between audit retention sweeps.
    pub retention_interval_secs: u64,

    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,

    /// Appended to an agent's name to form its UI host, e.g. `.agents.internal`.
    pub agent_ui_host_suffix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 3000,
            max_connections: 1024,
            execute_timeout_secs: 30,
            model_timeout_secs: 120,
            connect_timeout_secs: 10,
            rate_limit_per_minute: 60,
            retention_interval_secs: 24 * 60 * 60,
            secure_cookies: false,
            agent_ui_host_suffix: String::new(),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn bind_socket(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.bind_port)
    }

    #[must_use]
    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }

    #[must_use]
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs.max(1))
    }

    /// Host serving the UI of agent `name`.
    #[must_use]
    pub fn agent_ui_host(&self, name: &str) -> String {
        format!("{}{}", name, self.agent_ui_host_suffix)
    }
}

/// Key material the gateway needs at use time.
#[derive(Default)]
pub struct GatewaySecrets {
    pub master_key: Option<Zeroizing<String>>,
    pub admin_key: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for GatewaySecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySecrets")
            .field("master_key", &self.master_key.as_ref().map(|_| "[REDACTED]"))
            .field("admin_key", &self.admin_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl GatewaySecrets {
    /// Read both keys from the process environment. Blank values count as unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            master_key: read_env(MASTER_KEY_ENV),
            admin_key: read_env(ADMIN_KEY_ENV),
        }
    }
}

fn read_env(name: &str) -> Option<Zeroizing<String>> {
    std::env::var(name)
        .ok()
        .map(Zeroizing::new)
        .filter(|v| !v.trim().is_empty())
}
