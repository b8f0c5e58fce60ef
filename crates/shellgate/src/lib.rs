//! Core engine of the shellgate egress gateway.
//!
//! Agents never hold real credentials. They authenticate to the gateway with a
//! bearer token and the gateway decides, per request, whether the call may
//! leave the network, which secret to attach, and what to write to the audit
//! trail. This crate holds everything that decision needs and nothing that
//! touches a socket:
//!
//! - [`vault`] - AES-256-GCM sealing of stored credentials
//! - [`injector`] - attaching a decrypted credential to an outbound request
//! - [`ssrf`] - rejecting URLs that resolve into private address space
//! - [`session`] - HMAC-signed admin session tokens
//! - [`policy`] - priority-ordered allow/deny rules for CONNECT targets
//! - [`auth`] - agent bearer tokens, admin keys and admin sessions
//! - [`audit`] - the append-only audit trail and its retention pruner
//! - [`provider`] - picking the model provider an agent may use
//! - [`ratelimit`] - per-identity fixed window counters
//! - [`store`] - the persistence seam plus an in-memory implementation
//!
//! Network-facing pieces (CONNECT tunnels, the HTTP API, relays) live in
//! `shellgate-proxy`.

pub mod audit;
pub mod auth;
pub mod error;
pub mod injector;
pub mod model;
pub mod policy;
pub mod provider;
pub mod ratelimit;
pub mod session;
pub mod settings;
pub mod ssrf;
pub mod store;
pub mod token;
pub mod vault;

pub use error::{GatewayError, Result};
pub use store::{MemoryStore, Store};
