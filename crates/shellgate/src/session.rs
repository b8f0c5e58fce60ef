//! Signed admin session tokens.
//!
//! A token is `base64url(payload) "." base64url(hmac)` where the payload is
//! `{"sub":"admin","iat":<unix seconds>}` and the MAC is HMAC-SHA256 over the
//! encoded payload. The MAC key is derived from the admin key, so any gateway
//! holding the same admin key verifies tokens issued by any other, and
//! rotating the admin key invalidates every outstanding session.

use crate::error::{GatewayError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const SUBJECT: &str = "admin";
/// Issued-at timestamps this far in the future are still accepted.
const CLOCK_SKEW_SECS: i64 = 60;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
}

/// Issues and verifies admin session tokens.
#[derive(Clone)]
pub struct SessionSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner").finish_non_exhaustive()
    }
}

impl SessionSigner {
    /// Derive a signer from the admin key.
    pub fn new(admin_key: &str) -> Result<Self> {
        let key = Sha256::new()
            .chain_update(b"shellgate-session:")
            .chain_update(admin_key.as_bytes())
            .finalize();
        let mac = <HmacSha256 as Mac>::new_from_slice(&key).map_err(|_| {
            GatewayError::InternalConfig("cannot derive session signing key".to_string())
        })?;
        Ok(Self { mac })
    }

    fn mac(&self) -> HmacSha256 {
        self.mac.clone()
    }

    /// Issue a token stamped with the current time.
    #[must_use]
    pub fn issue(&self) -> String {
        self.issue_at(Utc::now().timestamp())
    }

    /// Issue a token stamped with `issued_at` (unix seconds).
    #[must_use]
    pub fn issue_at(&self, issued_at: i64) -> String {
        let claims = Claims {
            sub: SUBJECT.to_string(),
            iat: issued_at,
        };
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{}.{}", payload, signature)
    }

    /// Verify a token against the current time.
    #[must_use]
    pub fn verify(&self, token: &str, ttl_hours: u64) -> bool {
        self.verify_at(token, ttl_hours, Utc::now().timestamp())
    }

    /// Verify a token as of `now` (unix seconds).
    ///
    /// Rejects malformed tokens, bad signatures, a subject other than
    /// `admin`, tokens older than `ttl_hours`, and tokens issued in the
    /// future beyond a small clock-skew allowance.
    #[must_use]
    pub fn verify_at(&self, token: &str, ttl_hours: u64, now: i64) -> bool {
        let Some((payload, signature)) = token.split_once('.') else {
            return false;
        };
        if signature.contains('.') {
            return false;
        }
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };

        // verify_slice compares in constant time.
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            return false;
        }

        let Ok(json) = URL_SAFE_NO_PAD.decode(payload) else {
            return false;
        };
        let Ok(claims) = serde_json::from_slice::<Claims>(&json) else {
            return false;
        };
        if claims.sub != SUBJECT {
            return false;
        }

        let ttl_secs = i64::try_from(ttl_hours.saturating_mul(3600)).unwrap_or(i64::MAX);
        let age = now.saturating_sub(claims.iat);
        age >= -CLOCK_SKEW_SECS && age <= ttl_secs
    }
}
