//! Records the gateway reads and writes.
//!
//! Agents are "crabs", sealed credentials are "pearls" and audit rows are
//! "tides". Records that are safe to hand to an admin serialize directly in
//! the API's camelCase shape; [`Crab`] and [`Pearl`] do not serialize at all
//! because they carry a bearer token and sealed key material.

use crate::error::{GatewayError, Result};
use crate::vault::SealedSecret;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An automated caller of the gateway.
#[derive(Clone)]
pub struct Crab {
    pub id: String,
    pub name: String,
    /// Bearer token; returned once at registration, immutable afterwards.
    pub token: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// `None` means unrestricted. `Some(vec![])` denies every execute call.
    pub allowed_tools: Option<Vec<ToolGrant>>,
    pub ui_port: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Crab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crab")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("token", &"[REDACTED]")
            .field("active", &self.active)
            .field("expires_at", &self.expires_at)
            .field("ui_port", &self.ui_port)
            .finish_non_exhaustive()
    }
}

impl Crab {
    /// Whether the expiry timestamp has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Active and not expired.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.active && !self.is_expired()
    }

    /// Whether the allow-list permits `method` on `url`.
    ///
    /// No allow-list means unrestricted; an empty one denies everything.
    /// A grant whose pattern does not compile never matches.
    #[must_use]
    pub fn allows_tool(&self, url: &str, method: &str) -> bool {
        let Some(grants) = &self.allowed_tools else {
            return true;
        };
        grants.iter().any(|grant| {
            grant.method == method
                && regex::Regex::new(&grant.url).is_ok_and(|pattern| pattern.is_match(url))
        })
    }
}

/// Longest accepted agent name; names double as host labels.
pub const MAX_CRAB_NAME_LEN: usize = 63;

/// Check that `name` can be used as an agent name and UI host label.
pub fn validate_crab_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_CRAB_NAME_LEN {
        return Err(GatewayError::InvalidInput(format!(
            "name must be 1-{} characters",
            MAX_CRAB_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(GatewayError::InvalidInput(
            "name may only contain letters, digits, '-', '_' and '.'".to_string(),
        ));
    }
    Ok(())
}

/// Input for registering an agent.
#[derive(Debug, Clone, Default)]
pub struct NewCrab {
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub allowed_tools: Option<Vec<ToolGrant>>,
    pub ui_port: Option<u16>,
}

/// One permitted (url pattern, method) pair on an agent's allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolGrant {
    /// Regular expression matched against the full target URL.
    pub url: String,
    pub method: String,
}

/// One sealed credential scoped to (agent, service).
#[derive(Debug, Clone)]
pub struct Pearl {
    pub id: String,
    pub crab_id: String,
    pub service: String,
    pub label: Option<String>,
    pub sealed: SealedSecret,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for storing or replacing a credential.
#[derive(Debug, Clone)]
pub struct PearlUpsert {
    pub crab_id: String,
    pub service: String,
    /// Only overwrites an existing label when `Some`.
    pub label: Option<String>,
    pub sealed: SealedSecret,
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl RuleAction {
    /// Parse `ALLOW` / `DENY`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALLOW" => Some(RuleAction::Allow),
            "DENY" => Some(RuleAction::Deny),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "ALLOW",
            RuleAction::Deny => "DENY",
        }
    }
}

/// A priority-ordered CONNECT policy entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRule {
    pub id: String,
    /// Exact host, `*`, or `*.suffix`.
    pub domain: String,
    pub action: RuleAction,
    /// `None` for a global rule.
    pub crab_id: Option<String>,
    /// Lower evaluates first.
    pub priority: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Creation order, breaks priority ties.
    #[serde(skip)]
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub struct NewConnectRule {
    pub domain: String,
    pub action: RuleAction,
    pub crab_id: Option<String>,
    pub priority: i64,
    pub note: Option<String>,
}

/// Wire protocol spoken by a model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderProtocol {
    #[default]
    Openai,
    Anthropic,
}

/// Who may use a model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderScope {
    /// Any agent.
    #[default]
    Global,
    /// Only agents holding a grant.
    Restricted,
}

/// An upstream LLM endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProvider {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub protocol: ProviderProtocol,
    /// Vault service whose secret is injected as a bearer token.
    pub pearl_service: Option<String>,
    pub scope: ProviderScope,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub struct NewProvider {
    pub name: String,
    pub base_url: String,
    pub protocol: ProviderProtocol,
    pub pearl_service: Option<String>,
    pub scope: ProviderScope,
}

/// Partial provider update. `pearl_service: Some(None)` clears the field.
#[derive(Debug, Clone, Default)]
pub struct ProviderPatch {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub protocol: Option<ProviderProtocol>,
    pub pearl_service: Option<Option<String>>,
    pub scope: Option<ProviderScope>,
    pub active: Option<bool>,
}

/// Grants one agent access to a RESTRICTED provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderGrant {
    pub provider_id: String,
    pub crab_id: String,
    pub created_at: DateTime<Utc>,
}

/// Direction of an audited action. Only egress is recorded today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Egress,
}

/// One immutable audit row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tide {
    pub id: String,
    /// `None` for anonymous CONNECT tunnels.
    pub crab_id: Option<String>,
    pub direction: Direction,
    pub tool: String,
    pub target_url: Option<String>,
    pub method: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A tide before it is stamped with an id and timestamp.
#[derive(Debug, Clone, Default)]
pub struct NewTide {
    pub crab_id: Option<String>,
    pub tool: String,
    pub target_url: Option<String>,
    pub method: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

/// Filter and window for listing tides.
#[derive(Debug, Clone)]
pub struct TideQuery {
    pub crab_id: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

/// One page of tides, newest first, plus the unpaged total.
#[derive(Debug, Clone)]
pub struct TidePage {
    pub tides: Vec<Tide>,
    pub total: usize,
}
