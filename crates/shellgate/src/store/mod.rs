//! Persistence seam.
//!
//! The gateway keeps no business state of its own: every decision re-reads
//! the store, so a revocation or rule change applies to the very next request.
//! The store is split by concern so a caller (or a test double) only needs the
//! pieces it touches; [`Store`] is the union of all of them.
//!
//! Implementations report back-end failures as [`GatewayError::Store`]. Lookups
//! that miss return `Ok(None)` / `Ok(false)`, never an error.
//!
//! [`GatewayError::Store`]: crate::GatewayError::Store

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::model::{
    ConnectRule, Crab, ModelProvider, NewConnectRule, NewCrab, NewProvider, NewTide, Pearl,
    PearlUpsert, ProviderGrant, ProviderPatch, Tide, TidePage, TideQuery,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Registered agents.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Insert a new agent with the given token.
    ///
    /// Fails with `Conflict` when the name is taken.
    async fn create_crab(&self, crab: NewCrab, token: String) -> Result<Crab>;

    /// All agents, newest first.
    async fn list_crabs(&self) -> Result<Vec<Crab>>;

    async fn get_crab(&self, id: &str) -> Result<Option<Crab>>;

    async fn find_crab_by_token(&self, token: &str) -> Result<Option<Crab>>;

    async fn find_crab_by_name(&self, name: &str) -> Result<Option<Crab>>;

    /// Set `active = false`. Returns the updated agent, `None` if unknown.
    async fn revoke_crab(&self, id: &str) -> Result<Option<Crab>>;
}

/// Sealed credentials.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Insert or overwrite the credential for (agent, service).
    async fn upsert_pearl(&self, pearl: PearlUpsert) -> Result<Pearl>;

    /// Credentials, newest first, optionally for one agent.
    async fn list_pearls(&self, crab_id: Option<&str>) -> Result<Vec<Pearl>>;

    async fn get_pearl(&self, id: &str) -> Result<Option<Pearl>>;

    async fn find_pearl(&self, crab_id: &str, service: &str) -> Result<Option<Pearl>>;

    /// Oldest credential stored for `service` under any agent.
    async fn find_any_pearl(&self, service: &str) -> Result<Option<Pearl>>;

    async fn delete_pearl(&self, id: &str) -> Result<bool>;
}

/// CONNECT rules.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Every rule, priority ascending then creation order.
    async fn list_rules(&self) -> Result<Vec<ConnectRule>>;

    /// Global rules plus, when `crab_id` is set, that agent's own rules.
    /// Same ordering as [`list_rules`](Self::list_rules).
    async fn rules_for(&self, crab_id: Option<&str>) -> Result<Vec<ConnectRule>>;

    async fn create_rule(&self, rule: NewConnectRule) -> Result<ConnectRule>;

    async fn delete_rule(&self, id: &str) -> Result<bool>;
}

/// Runtime key/value settings.
#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Stored settings, sorted by key.
    async fn list_settings(&self) -> Result<Vec<(String, String)>>;
}

/// Model providers and their access grants.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// All providers in creation order.
    async fn list_providers(&self) -> Result<Vec<ModelProvider>>;

    async fn get_provider(&self, id: &str) -> Result<Option<ModelProvider>>;

    async fn create_provider(&self, provider: NewProvider) -> Result<ModelProvider>;

    async fn update_provider(&self, id: &str, patch: ProviderPatch)
        -> Result<Option<ModelProvider>>;

    /// Remove a provider and every grant on it.
    async fn delete_provider(&self, id: &str) -> Result<bool>;

    /// Grant access; granting twice returns the existing grant.
    async fn grant_provider(&self, provider_id: &str, crab_id: &str) -> Result<ProviderGrant>;

    async fn revoke_provider_grant(&self, provider_id: &str, crab_id: &str) -> Result<bool>;

    async fn list_grants(&self, provider_id: &str) -> Result<Vec<ProviderGrant>>;

    async fn has_grant(&self, provider_id: &str, crab_id: &str) -> Result<bool>;
}

/// The append-only audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_tide(&self, tide: NewTide) -> Result<Tide>;

    /// One page of tides, newest first.
    async fn list_tides(&self, query: TideQuery) -> Result<TidePage>;

    /// Delete every tide created before `cutoff`. Returns the number removed.
    async fn prune_tides(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Everything the gateway persists.
pub trait Store:
    AgentStore + VaultStore + PolicyStore + SettingStore + ProviderStore + AuditStore
{
}

impl<T> Store for T where
    T: AgentStore + VaultStore + PolicyStore + SettingStore + ProviderStore + AuditStore + ?Sized
{
}
