//! CONNECT domain policy.
//!
//! Rules are evaluated in priority order (lower first, ties by creation
//! order) and the first rule whose pattern matches the host decides. Global
//! rules always apply; an agent's own rules apply only when the tunnel
//! request carried a valid identity. With no match the
//! `connect_proxy_default` setting decides.
//!
//! Patterns:
//! - `*` matches any host
//! - `*.example.com` matches `api.example.com` but not `example.com`
//! - anything else is an exact match
//!
//! Matching is case-insensitive. Store failures propagate so the caller can
//! refuse the tunnel instead of falling back to the default.

use crate::error::Result;
use crate::model::{ConnectRule, RuleAction};
use crate::settings;
use crate::store::{PolicyStore, SettingStore};

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// A rule matched.
    Rule {
        rule_id: String,
        domain: String,
        action: RuleAction,
    },
    /// Nothing matched; the configured default applied.
    Default { action: RuleAction },
}

impl PolicyDecision {
    #[must_use]
    pub fn action(&self) -> RuleAction {
        match self {
            PolicyDecision::Rule { action, .. } | PolicyDecision::Default { action } => *action,
        }
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.action() == RuleAction::Allow
    }

    /// A human-readable reason for the decision
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            PolicyDecision::Rule { domain, action, .. } => {
                format!("{} by rule {}", verb(*action), domain)
            }
            PolicyDecision::Default { action } => {
                format!("{} by connect_proxy_default", verb(*action))
            }
        }
    }
}

fn verb(action: RuleAction) -> &'static str {
    match action {
        RuleAction::Allow => "allowed",
        RuleAction::Deny => "denied",
    }
}

/// Whether `host` matches a rule `pattern`.
#[must_use]
pub fn domain_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    let host = host.trim().trim_end_matches('.').to_lowercase();

    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        // suffix keeps its leading dot: "*.a.com" -> ".a.com"
        return suffix.starts_with('.') && host.len() > suffix.len() && host.ends_with(suffix);
    }
    host == pattern
}

/// First rule in `rules` (already ordered) that matches `host`.
#[must_use]
pub fn first_match<'a>(rules: &'a [ConnectRule], host: &str) -> Option<&'a ConnectRule> {
    rules.iter().find(|rule| domain_matches(&rule.domain, host))
}

/// Decide whether a tunnel to `host` may open for `crab_id` (`None` = anonymous).
pub async fn evaluate<S>(store: &S, host: &str, crab_id: Option<&str>) -> Result<PolicyDecision>
where
    S: PolicyStore + SettingStore + ?Sized,
{
    let rules = store.rules_for(crab_id).await?;
    if let Some(rule) = first_match(&rules, host) {
        return Ok(PolicyDecision::Rule {
            rule_id: rule.id.clone(),
            domain: rule.domain.clone(),
            action: rule.action,
        });
    }
    let action = settings::connect_default(store).await?;
    Ok(PolicyDecision::Default { action })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::model::NewConnectRule;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    async fn add(store: &MemoryStore, domain: &str, action: RuleAction, priority: i64, crab: Option<&str>) {
        store
            .create_rule(NewConnectRule {
                domain: domain.to_string(),
                action,
                crab_id: crab.map(str::to_string),
                priority,
                note: None,
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_star_matches_everything() {
        assert!(domain_matches("*", "anything.com"));
        assert!(domain_matches("*", "localhost"));
    }

    #[test]
    fn test_wildcard_excludes_apex() {
        assert!(domain_matches("*.telegram.org", "api.telegram.org"));
        assert!(domain_matches("*.telegram.org", "a.b.telegram.org"));
        assert!(!domain_matches("*.telegram.org", "telegram.org"));
        assert!(!domain_matches("*.telegram.org", "eviltelegram.org"));
    }

    #[test]
    fn test_exact_match() {
        assert!(domain_matches("api.github.com", "api.github.com"));
        assert!(!domain_matches("api.github.com", "gist.github.com"));
        assert!(!domain_matches("github.com", "api.github.com"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(domain_matches("API.GitHub.com", "api.github.COM"));
        assert!(domain_matches("*.Example.com", "WWW.example.com"));
    }

    #[tokio::test]
    async fn test_lower_priority_wins_over_specificity() {
        let store = MemoryStore::new();
        add(&store, "*", RuleAction::Deny, 10, None).await;
        add(&store, "*.ok.com", RuleAction::Allow, 20, None).await;

        let decision = evaluate(&store, "x.ok.com", None).await.unwrap();
        assert!(!decision.is_allowed());
        assert!(matches!(decision, PolicyDecision::Rule { .. }));
    }

    #[tokio::test]
    async fn test_ties_break_by_creation_order() {
        let store = MemoryStore::new();
        add(&store, "a.com", RuleAction::Allow, 50, None).await;
        add(&store, "a.com", RuleAction::Deny, 50, None).await;
        assert!(evaluate(&store, "a.com", None).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_default_allow_when_unset() {
        let store = MemoryStore::new();
        let decision = evaluate(&store, "example.com", None).await.unwrap();
        assert_eq!(
            decision,
            PolicyDecision::Default {
                action: RuleAction::Allow
            }
        );
    }

    #[tokio::test]
    async fn test_default_setting_applies() {
        let store = MemoryStore::new();
        store
            .set_setting(settings::CONNECT_PROXY_DEFAULT, "DENY")
            .await
            .unwrap();
        add(&store, "allowed.com", RuleAction::Allow, 100, None).await;

        assert!(evaluate(&store, "allowed.com", None).await.unwrap().is_allowed());
        assert!(!evaluate(&store, "other.com", None).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_agent_rules_need_identity() {
        let store = MemoryStore::new();
        add(&store, "blocked.com", RuleAction::Deny, 1, Some("crab-1")).await;

        assert!(evaluate(&store, "blocked.com", None).await.unwrap().is_allowed());
        assert!(evaluate(&store, "blocked.com", Some("crab-2")).await.unwrap().is_allowed());
        assert!(!evaluate(&store, "blocked.com", Some("crab-1")).await.unwrap().is_allowed());
    }

    struct BrokenRules;

    #[async_trait]
    impl PolicyStore for BrokenRules {
        async fn list_rules(&self) -> Result<Vec<ConnectRule>> {
            Err(GatewayError::Store("connection reset".into()))
        }
        async fn rules_for(&self, _crab_id: Option<&str>) -> Result<Vec<ConnectRule>> {
            Err(GatewayError::Store("connection reset".into()))
        }
        async fn create_rule(&self, _rule: NewConnectRule) -> Result<ConnectRule> {
            Err(GatewayError::Store("connection reset".into()))
        }
        async fn delete_rule(&self, _id: &str) -> Result<bool> {
            Err(GatewayError::Store("connection reset".into()))
        }
    }

    #[async_trait]
    impl SettingStore for BrokenRules {
        async fn get_setting(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn set_setting(&self, _key: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn list_settings(&self) -> Result<Vec<(String, String)>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let err = evaluate(&BrokenRules, "example.com", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Store(_)));
    }
}
