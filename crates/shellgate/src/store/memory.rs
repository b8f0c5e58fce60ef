//! In-memory store.

use super::{AgentStore, AuditStore, PolicyStore, ProviderStore, SettingStore, VaultStore};
use crate::error::{GatewayError, Result};
use crate::model::{
    ConnectRule, Crab, Direction, ModelProvider, NewConnectRule, NewCrab, NewProvider, NewTide,
    Pearl, PearlUpsert, ProviderGrant, ProviderPatch, Tide, TidePage, TideQuery,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    seq: u64,
    crabs: Vec<Crab>,
    pearls: Vec<Pearl>,
    rules: Vec<ConnectRule>,
    settings: BTreeMap<String, String>,
    providers: Vec<ModelProvider>,
    grants: Vec<ProviderGrant>,
    /// Append order is creation order.
    tides: Vec<Tide>,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// A [`Store`](super::Store) held entirely in process memory.
///
/// Everything is lost on restart. Suitable for a single gateway instance and
/// for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn sort_rules(rules: &mut [ConnectRule]) {
    rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.seq.cmp(&b.seq)));
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn create_crab(&self, crab: NewCrab, token: String) -> Result<Crab> {
        let mut inner = self.inner.write().await;
        if inner.crabs.iter().any(|c| c.name == crab.name) {
            return Err(GatewayError::Conflict(format!(
                "Agent \"{}\" already exists",
                crab.name
            )));
        }
        let now = Utc::now();
        let record = Crab {
            id: new_id(),
            name: crab.name,
            token,
            active: true,
            expires_at: crab.expires_at,
            allowed_tools: crab.allowed_tools,
            ui_port: crab.ui_port,
            created_at: now,
            updated_at: now,
        };
        inner.crabs.push(record.clone());
        Ok(record)
    }

    async fn list_crabs(&self) -> Result<Vec<Crab>> {
        let inner = self.inner.read().await;
        Ok(inner.crabs.iter().rev().cloned().collect())
    }

    async fn get_crab(&self, id: &str) -> Result<Option<Crab>> {
        let inner = self.inner.read().await;
        Ok(inner.crabs.iter().find(|c| c.id == id).cloned())
    }

    async fn find_crab_by_token(&self, token: &str) -> Result<Option<Crab>> {
        let inner = self.inner.read().await;
        Ok(inner
            .crabs
            .iter()
            .find(|c| crate::token::constant_time_eq(c.token.as_bytes(), token.as_bytes()))
            .cloned())
    }

    async fn find_crab_by_name(&self, name: &str) -> Result<Option<Crab>> {
        let inner = self.inner.read().await;
        Ok(inner.crabs.iter().find(|c| c.name == name).cloned())
    }

    async fn revoke_crab(&self, id: &str) -> Result<Option<Crab>> {
        let mut inner = self.inner.write().await;
        Ok(inner.crabs.iter_mut().find(|c| c.id == id).map(|crab| {
            crab.active = false;
            crab.updated_at = Utc::now();
            crab.clone()
        }))
    }
}

#[async_trait]
impl VaultStore for MemoryStore {
    async fn upsert_pearl(&self, pearl: PearlUpsert) -> Result<Pearl> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        if let Some(existing) = inner
            .pearls
            .iter_mut()
            .find(|p| p.crab_id == pearl.crab_id && p.service == pearl.service)
        {
            existing.sealed = pearl.sealed;
            if pearl.label.is_some() {
                existing.label = pearl.label;
            }
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let record = Pearl {
            id: new_id(),
            crab_id: pearl.crab_id,
            service: pearl.service,
            label: pearl.label,
            sealed: pearl.sealed,
            created_at: now,
            updated_at: now,
        };
        inner.pearls.push(record.clone());
        Ok(record)
    }

    async fn list_pearls(&self, crab_id: Option<&str>) -> Result<Vec<Pearl>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pearls
            .iter()
            .rev()
            .filter(|p| crab_id.map_or(true, |id| p.crab_id == id))
            .cloned()
            .collect())
    }

    async fn get_pearl(&self, id: &str) -> Result<Option<Pearl>> {
        let inner = self.inner.read().await;
        Ok(inner.pearls.iter().find(|p| p.id == id).cloned())
    }

    async fn find_pearl(&self, crab_id: &str, service: &str) -> Result<Option<Pearl>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pearls
            .iter()
            .find(|p| p.crab_id == crab_id && p.service == service)
            .cloned())
    }

    async fn find_any_pearl(&self, service: &str) -> Result<Option<Pearl>> {
        let inner = self.inner.read().await;
        Ok(inner.pearls.iter().find(|p| p.service == service).cloned())
    }

    async fn delete_pearl(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.pearls.len();
        inner.pearls.retain(|p| p.id != id);
        Ok(inner.pearls.len() != before)
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn list_rules(&self) -> Result<Vec<ConnectRule>> {
        let inner = self.inner.read().await;
        let mut rules = inner.rules.clone();
        sort_rules(&mut rules);
        Ok(rules)
    }

    async fn rules_for(&self, crab_id: Option<&str>) -> Result<Vec<ConnectRule>> {
        let inner = self.inner.read().await;
        let mut rules: Vec<ConnectRule> = inner
            .rules
            .iter()
            .filter(|r| match (&r.crab_id, crab_id) {
                (None, _) => true,
                (Some(owner), Some(id)) => owner == id,
                (Some(_), None) => false,
            })
            .cloned()
            .collect();
        sort_rules(&mut rules);
        Ok(rules)
    }

    async fn create_rule(&self, rule: NewConnectRule) -> Result<ConnectRule> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq();
        let record = ConnectRule {
            id: new_id(),
            domain: rule.domain,
            action: rule.action,
            crab_id: rule.crab_id,
            priority: rule.priority,
            note: rule.note,
            created_at: Utc::now(),
            seq,
        };
        inner.rules.push(record.clone());
        Ok(record)
    }

    async fn delete_rule(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.rules.len();
        inner.rules.retain(|r| r.id != id);
        Ok(inner.rules.len() != before)
    }
}

#[async_trait]
impl SettingStore for MemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let inner = self.inner.read().await;
        Ok(inner
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn list_providers(&self) -> Result<Vec<ModelProvider>> {
        let inner = self.inner.read().await;
        let mut providers = inner.providers.clone();
        providers.sort_by_key(|p| p.seq);
        Ok(providers)
    }

    async fn get_provider(&self, id: &str) -> Result<Option<ModelProvider>> {
        let inner = self.inner.read().await;
        Ok(inner.providers.iter().find(|p| p.id == id).cloned())
    }

    async fn create_provider(&self, provider: NewProvider) -> Result<ModelProvider> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq();
        let now = Utc::now();
        let record = ModelProvider {
            id: new_id(),
            name: provider.name,
            base_url: provider.base_url,
            protocol: provider.protocol,
            pearl_service: provider.pearl_service,
            scope: provider.scope,
            active: true,
            created_at: now,
            updated_at: now,
            seq,
        };
        inner.providers.push(record.clone());
        Ok(record)
    }

    async fn update_provider(
        &self,
        id: &str,
        patch: ProviderPatch,
    ) -> Result<Option<ModelProvider>> {
        let mut inner = self.inner.write().await;
        let Some(provider) = inner.providers.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            provider.name = name;
        }
        if let Some(base_url) = patch.base_url {
            provider.base_url = base_url;
        }
        if let Some(protocol) = patch.protocol {
            provider.protocol = protocol;
        }
        if let Some(pearl_service) = patch.pearl_service {
            provider.pearl_service = pearl_service;
        }
        if let Some(scope) = patch.scope {
            provider.scope = scope;
        }
        if let Some(active) = patch.active {
            provider.active = active;
        }
        provider.updated_at = Utc::now();
        Ok(Some(provider.clone()))
    }

    async fn delete_provider(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.providers.len();
        inner.providers.retain(|p| p.id != id);
        let removed = inner.providers.len() != before;
        if removed {
            inner.grants.retain(|g| g.provider_id != id);
        }
        Ok(removed)
    }

    async fn grant_provider(&self, provider_id: &str, crab_id: &str) -> Result<ProviderGrant> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .grants
            .iter()
            .find(|g| g.provider_id == provider_id && g.crab_id == crab_id)
        {
            return Ok(existing.clone());
        }
        let grant = ProviderGrant {
            provider_id: provider_id.to_string(),
            crab_id: crab_id.to_string(),
            created_at: Utc::now(),
        };
        inner.grants.push(grant.clone());
        Ok(grant)
    }

    async fn revoke_provider_grant(&self, provider_id: &str, crab_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.grants.len();
        inner
            .grants
            .retain(|g| !(g.provider_id == provider_id && g.crab_id == crab_id));
        Ok(inner.grants.len() != before)
    }

    async fn list_grants(&self, provider_id: &str) -> Result<Vec<ProviderGrant>> {
        let inner = self.inner.read().await;
        Ok(inner
            .grants
            .iter()
            .filter(|g| g.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn has_grant(&self, provider_id: &str, crab_id: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .grants
            .iter()
            .any(|g| g.provider_id == provider_id && g.crab_id == crab_id))
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_tide(&self, tide: NewTide) -> Result<Tide> {
        let mut inner = self.inner.write().await;
        let record = Tide {
            id: new_id(),
            crab_id: tide.crab_id,
            direction: Direction::Egress,
            tool: tide.tool,
            target_url: tide.target_url,
            method: tide.method,
            request_body: tide.request_body,
            response_body: tide.response_body,
            status_code: tide.status_code,
            error: tide.error,
            created_at: Utc::now(),
        };
        inner.tides.push(record.clone());
        Ok(record)
    }

    async fn list_tides(&self, query: TideQuery) -> Result<TidePage> {
        let inner = self.inner.read().await;
        let matching: Vec<&Tide> = inner
            .tides
            .iter()
            .rev()
            .filter(|t| match &query.crab_id {
                Some(id) => t.crab_id.as_deref() == Some(id.as_str()),
                None => true,
            })
            .collect();
        let total = matching.len();
        let tides = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        Ok(TidePage { tides, total })
    }

    async fn prune_tides(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.tides.len();
        inner.tides.retain(|t| t.created_at >= cutoff);
        Ok(before - inner.tides.len())
    }
}
