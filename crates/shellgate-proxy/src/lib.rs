//! Network surface of the shellgate egress gateway.
//!
//! One TCP listener serves three kinds of traffic:
//!
//! - `CONNECT host:port` requests become opaque tunnels, gated by the domain
//!   policy and audited once at establishment ([`connect`])
//! - WebSocket upgrades on `/agents/{name}/...` are relayed to the agent's UI
//!   after a manual session check ([`upgrade`])
//! - everything else is served by the axum router in [`api`], which holds the
//!   execute gateway, the model proxy, the agent UI relay and the admin routes
//!
//! Raw requests are intercepted in [`server`] before they reach the router,
//! so CONNECT semantics never pass through a route handler.

pub mod api;
pub mod config;
pub mod connect;
pub mod error;
pub mod head;
pub mod relay;
pub mod rewind;
pub mod server;
pub mod state;
pub mod upgrade;

pub use config::{GatewayConfig, GatewaySecrets};
pub use error::{ProxyError, Result};
pub use server::{start, GatewayHandle};
pub use state::{AppState, GatewayState};
