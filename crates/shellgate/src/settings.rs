//! Runtime settings and their defaults.
//!
//! Settings live in the store as plain strings. This module is the single
//! place that knows what an absent key means; every reader goes through the
//! typed accessors below rather than interpreting raw values itself.

use crate::error::{GatewayError, Result};
use crate::model::RuleAction;
use crate::store::SettingStore;
use std::collections::BTreeMap;
use tracing::warn;

/// Fallback action for CONNECT targets no rule matches (`ALLOW` / `DENY`).
pub const CONNECT_PROXY_DEFAULT: &str = "connect_proxy_default";
/// Admin session lifetime in hours.
pub const SESSION_COOKIE_TTL_HOURS: &str = "session_cookie_ttl_hours";
/// Audit rows older than this many days are pruned; `0` keeps them forever.
pub const AUDIT_LOG_RETENTION_DAYS: &str = "audit_log_retention_days";

/// Every known setting with its default value.
pub const DEFAULTS: &[(&str, &str)] = &[
    (CONNECT_PROXY_DEFAULT, "ALLOW"),
    (SESSION_COOKIE_TTL_HOURS, "8"),
    (AUDIT_LOG_RETENTION_DAYS, "0"),
];

const DEFAULT_SESSION_TTL_HOURS: u64 = 8;

/// Default value for `key`, if it is a known setting.
#[must_use]
pub fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Check a value before it is stored.
///
/// Unknown keys are accepted as-is.
pub fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        CONNECT_PROXY_DEFAULT => {
            if RuleAction::parse(value).is_none() {
                return Err(GatewayError::InvalidInput(
                    "connect_proxy_default must be ALLOW or DENY".to_string(),
                ));
            }
        }
        SESSION_COOKIE_TTL_HOURS | AUDIT_LOG_RETENTION_DAYS => {
            if value.trim().parse::<u64>().is_err() {
                return Err(GatewayError::InvalidInput(format!(
                    "{} must be a non-negative integer",
                    key
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Stored settings merged over the default table.
pub async fn effective<S: SettingStore + ?Sized>(store: &S) -> Result<BTreeMap<String, String>> {
    let mut map: BTreeMap<String, String> = DEFAULTS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (key, value) in store.list_settings().await? {
        map.insert(key, value);
    }
    Ok(map)
}

/// Action applied when no CONNECT rule matches.
pub async fn connect_default<S: SettingStore + ?Sized>(store: &S) -> Result<RuleAction> {
    match store.get_setting(CONNECT_PROXY_DEFAULT).await? {
        None => Ok(RuleAction::Allow),
        Some(raw) => Ok(RuleAction::parse(raw.trim()).unwrap_or_else(|| {
            warn!(
                "Ignoring invalid {} value {:?}, using ALLOW",
                CONNECT_PROXY_DEFAULT, raw
            );
            RuleAction::Allow
        })),
    }
}

/// Admin session lifetime in hours.
pub async fn session_ttl_hours<S: SettingStore + ?Sized>(store: &S) -> Result<u64> {
    read_u64(store, SESSION_COOKIE_TTL_HOURS, DEFAULT_SESSION_TTL_HOURS).await
}

/// Audit retention window in days; `0` disables pruning.
pub async fn retention_days<S: SettingStore + ?Sized>(store: &S) -> Result<u64> {
    read_u64(store, AUDIT_LOG_RETENTION_DAYS, 0).await
}

async fn read_u64<S: SettingStore + ?Sized>(store: &S, key: &str, default: u64) -> Result<u64> {
    match store.get_setting(key).await? {
        None => Ok(default),
        Some(raw) => Ok(raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {} value {:?}, using {}", key, raw, default);
            default
        })),
    }
}
