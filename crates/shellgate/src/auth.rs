//! Identity and authorization checks.
//!
//! Three independent gates:
//! - agent bearer tokens ([`authenticate_agent`]) for execute and model calls
//! - the admin API key header ([`AdminAuth::check_key`]) for management routes
//! - signed admin session cookies ([`AdminAuth::check_session`]) for the
//!   agent UI relay
//!
//! CONNECT tunnels use [`resolve_tunnel_identity`], which never fails: a
//! missing or bad credential just means the tunnel is anonymous.

use crate::error::{GatewayError, Result};
use crate::model::Crab;
use crate::session::SessionSigner;
use crate::settings;
use crate::store::{AgentStore, SettingStore};
use crate::token::constant_time_eq;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cookie::Cookie;
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

/// Header carrying the admin API key.
pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";
/// Cookie carrying the signed admin session.
pub const SESSION_COOKIE: &str = "shellgate_session";

/// Extract the token from `Bearer <token>`.
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Session token carried in a raw `Cookie` header, if any.
///
/// Malformed pairs are skipped rather than failing the whole header.
#[must_use]
pub fn session_token(cookie_header: &str) -> Option<String> {
    Cookie::split_parse(cookie_header)
        .flatten()
        .find(|c| c.name() == SESSION_COOKIE)
        .map(|c| c.value().to_string())
}

/// Resolve a bearer `Authorization` header to a usable agent.
///
/// Unknown tokens are `Unauthorized`; revoked or expired agents are
/// `Forbidden` even when the token itself is valid.
pub async fn authenticate_agent<S: AgentStore + ?Sized>(
    store: &S,
    authorization: Option<&str>,
) -> Result<Crab> {
    let token = authorization.and_then(parse_bearer).ok_or_else(|| {
        GatewayError::Unauthorized(
            "Missing or malformed Authorization header. Expected: Bearer <token>".to_string(),
        )
    })?;

    let crab = store
        .find_crab_by_token(token)
        .await?
        .ok_or_else(|| GatewayError::Unauthorized("Invalid agent token".to_string()))?;

    if !crab.active {
        return Err(GatewayError::Forbidden(format!(
            "Agent \"{}\" has been revoked",
            crab.name
        )));
    }
    if crab.is_expired() {
        return Err(GatewayError::Forbidden(format!(
            "Agent \"{}\" has expired",
            crab.name
        )));
    }
    Ok(crab)
}

/// Best-effort identity for a CONNECT request.
///
/// Accepts `Proxy-Authorization: Bearer <token>` and, for clients that only
/// speak Basic proxy auth, `Basic base64(<anything>:<token>)`. Any failure
/// (including a store error) yields `None`.
pub async fn resolve_tunnel_identity<S: AgentStore + ?Sized>(
    store: &S,
    proxy_authorization: Option<&str>,
) -> Option<Crab> {
    let header = proxy_authorization?;
    let token: Zeroizing<String> = if let Some(token) = parse_bearer(header) {
        Zeroizing::new(token.to_string())
    } else {
        let encoded = header.strip_prefix("Basic ")?.trim();
        let decoded = Zeroizing::new(STANDARD.decode(encoded).ok()?);
        let decoded = std::str::from_utf8(&decoded).ok()?;
        let (_, password) = decoded.split_once(':')?;
        Zeroizing::new(password.to_string())
    };

    match authenticate_agent(store, Some(&format!("Bearer {}", token.as_str()))).await {
        Ok(crab) => Some(crab),
        Err(GatewayError::Store(e)) => {
            warn!("Tunnel identity lookup failed, treating as anonymous: {}", e);
            None
        }
        Err(e) => {
            debug!("Tunnel credential rejected: {}", e);
            None
        }
    }
}

/// Admin key and session checks.
#[derive(Clone)]
pub struct AdminAuth {
    admin_key: Option<Zeroizing<String>>,
    signer: Option<SessionSigner>,
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuth")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl AdminAuth {
    /// Build from the configured admin key, if any.
    pub fn new(admin_key: Option<Zeroizing<String>>) -> Result<Self> {
        let admin_key = admin_key.filter(|k| !k.trim().is_empty());
        let signer = match &admin_key {
            Some(key) => Some(SessionSigner::new(key)?),
            None => None,
        };
        Ok(Self { admin_key, signer })
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.admin_key.is_some()
    }

    fn key(&self) -> Result<&str> {
        match &self.admin_key {
            Some(key) => Ok(key.as_str()),
            None => {
                error!("Admin API key is not configured; admin routes are unavailable");
                Err(GatewayError::InternalConfig(
                    "admin API key is not configured".to_string(),
                ))
            }
        }
    }

    fn signer(&self) -> Result<&SessionSigner> {
        self.key()?;
        self.signer.as_ref().ok_or_else(|| {
            GatewayError::InternalConfig("session signer is not configured".to_string())
        })
    }

    /// Check a provided admin key.
    ///
    /// A server without an admin key fails with `InternalConfig`, never with
    /// a client error.
    pub fn check_key(&self, provided: Option<&str>) -> Result<()> {
        let expected = self.key()?;
        let provided = provided.ok_or_else(|| {
            GatewayError::Unauthorized(format!("Missing {} header", ADMIN_KEY_HEADER))
        })?;
        if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
            Ok(())
        } else {
            Err(GatewayError::Unauthorized("Invalid admin API key".to_string()))
        }
    }

    /// Issue a fresh session token.
    pub fn issue_session(&self) -> Result<String> {
        Ok(self.signer()?.issue())
    }

    /// Verify a session token against the current TTL setting.
    pub async fn check_session<S: SettingStore + ?Sized>(
        &self,
        store: &S,
        token: Option<&str>,
    ) -> Result<()> {
        let signer = self.signer()?;
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Unauthorized("Not authenticated".to_string()))?;
        let ttl_hours = settings::session_ttl_hours(store).await?;
        if signer.verify(token, ttl_hours) {
            Ok(())
        } else {
            Err(GatewayError::Unauthorized(
                "Session expired or invalid".to_string(),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::NewCrab;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    async fn store_with(name: &str, token: &str, expires_in: Option<Duration>) -> (MemoryStore, Crab) {
        let store = MemoryStore::new();
        let crab = store
            .create_crab(
                NewCrab {
                    name: name.to_string(),
                    expires_at: expires_in.map(|d| Utc::now() + d),
                    ..NewCrab::default()
                },
                token.to_string(),
            )
            .await
            .unwrap();
        (store, crab)
    }

    fn admin(key: &str) -> AdminAuth {
        AdminAuth::new(Some(Zeroizing::new(key.to_string()))).unwrap()
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("Bearer   "), None);
        assert_eq!(parse_bearer("bearer abc"), None);
        assert_eq!(parse_bearer("Basic abc"), None);
    }

    #[test]
    fn test_session_token_from_cookie_header() {
        let header = "theme=dark; shellgate_session=abc.def ; other=1";
        assert_eq!(session_token(header).as_deref(), Some("abc.def"));
        assert_eq!(session_token("theme=dark"), None);
        assert_eq!(session_token(""), None);
        assert_eq!(
            session_token("junk; shellgate_session=abc").as_deref(),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn test_agent_auth_ok() {
        let (store, crab) = store_with("scout", "tok", None).await;
        let found = authenticate_agent(&store, Some("Bearer tok")).await.unwrap();
        assert_eq!(found.id, crab.id);
    }

    #[tokio::test]
    async fn test_agent_auth_missing_or_unknown() {
        let (store, _) = store_with("scout", "tok", None).await;
        for header in [None, Some("tok"), Some("Bearer nope")] {
            let err = authenticate_agent(&store, header).await.unwrap_err();
            assert_eq!(err.status(), 401, "header {:?}", header);
        }
    }

    #[tokio::test]
    async fn test_revoked_agent_forbidden() {
        let (store, crab) = store_with("scout", "tok", None).await;
        store.revoke_crab(&crab.id).await.unwrap();
        let err = authenticate_agent(&store, Some("Bearer tok")).await.unwrap_err();
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn test_expired_agent_forbidden() {
        let (store, _) = store_with("scout", "tok", Some(Duration::seconds(-5))).await;
        let err = authenticate_agent(&store, Some("Bearer tok")).await.unwrap_err();
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn test_tunnel_identity_bearer_and_basic() {
        let (store, crab) = store_with("scout", "tok", None).await;
        let via_bearer = resolve_tunnel_identity(&store, Some("Bearer tok")).await;
        assert_eq!(via_bearer.map(|c| c.id), Some(crab.id.clone()));

        let basic = format!("Basic {}", STANDARD.encode("scout:tok"));
        let via_basic = resolve_tunnel_identity(&store, Some(&basic)).await;
        assert_eq!(via_basic.map(|c| c.id), Some(crab.id));
    }

    #[tokio::test]
    async fn test_tunnel_identity_is_best_effort() {
        let (store, crab) = store_with("scout", "tok", None).await;
        assert!(resolve_tunnel_identity(&store, None).await.is_none());
        assert!(resolve_tunnel_identity(&store, Some("Bearer wrong")).await.is_none());
        assert!(resolve_tunnel_identity(&store, Some("Basic !!!")).await.is_none());

        store.revoke_crab(&crab.id).await.unwrap();
        assert!(resolve_tunnel_identity(&store, Some("Bearer tok")).await.is_none());
    }

    #[test]
    fn test_admin_key() {
        let auth = admin("super-secret");
        assert!(auth.check_key(Some("super-secret")).is_ok());
        assert_eq!(auth.check_key(Some("wrong")).unwrap_err().status(), 401);
        assert_eq!(auth.check_key(None).unwrap_err().status(), 401);
    }

    #[test]
    fn test_missing_admin_key_is_server_error() {
        let auth = AdminAuth::new(None).unwrap();
        assert!(!auth.is_configured());
        let err = auth.check_key(Some("anything")).unwrap_err();
        assert!(matches!(err, GatewayError::InternalConfig(_)));
        assert!(auth.issue_session().is_err());

        let blank = AdminAuth::new(Some(Zeroizing::new("  ".to_string()))).unwrap();
        assert!(!blank.is_configured());
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = MemoryStore::new();
        let auth = admin("k");
        let token = auth.issue_session().unwrap();
        assert!(auth.check_session(&store, Some(&token)).await.is_ok());
        assert_eq!(
            auth.check_session(&store, None).await.unwrap_err().status(),
            401
        );
        assert_eq!(
            admin("other").check_session(&store, Some(&token)).await.unwrap_err().status(),
            401
        );
    }

    #[tokio::test]
    async fn test_session_ttl_setting_applies() {
        let store = MemoryStore::new();
        store
            .set_setting(settings::SESSION_COOKIE_TTL_HOURS, "1")
            .await
            .unwrap();
        let auth = admin("k");
        let old = SessionSigner::new("k")
            .unwrap()
            .issue_at(Utc::now().timestamp() - 2 * 3600);
        assert!(auth.check_session(&store, Some(&old)).await.is_err());
    }
}
