//! Credential injection into outbound requests.
//!
//! Given a target URL, a decrypted secret and an [`Injection`], produce the
//! final URL and header set for the outbound call. The function is pure: no
//! I/O, no logging, same output for the same input.
//!
//! Supported modes:
//! - `bearer`: `Authorization: Bearer <secret>`
//! - `basic`: `Authorization: Basic base64(<secret>)`, secret is `user:pass`
//! - `header`: `<param_name>: <secret>`
//! - `queryparam`: `?<param_name>=<secret>`, other parameters preserved

use crate::error::{GatewayError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// User agent sent on every injected request.
pub const GATEWAY_USER_AGENT: &str = concat!("shellgate/", env!("CARGO_PKG_VERSION"));

/// How a credential is attached to a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// `Authorization: Bearer <secret>` (default)
    #[default]
    Bearer,
    /// `Authorization: Basic base64(<secret>)`
    Basic,
    /// Arbitrary header named by `param_name`
    Header,
    /// Query parameter named by `param_name`
    #[serde(rename = "queryparam")]
    QueryParam,
}

impl FromStr for AuthType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bearer" => Ok(AuthType::Bearer),
            "basic" => Ok(AuthType::Basic),
            "header" => Ok(AuthType::Header),
            "queryparam" => Ok(AuthType::QueryParam),
            other => Err(GatewayError::InvalidInput(format!(
                "Unknown authType: {} (expected bearer, basic, header or queryparam)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthType::Bearer => write!(f, "bearer"),
            AuthType::Basic => write!(f, "basic"),
            AuthType::Header => write!(f, "header"),
            AuthType::QueryParam => write!(f, "queryparam"),
        }
    }
}

/// Injection settings for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Injection {
    pub auth_type: AuthType,
    /// Header or query parameter name; required by `header` and `queryparam`.
    pub param_name: Option<String>,
}

impl Injection {
    #[must_use]
    pub fn new(auth_type: AuthType, param_name: Option<String>) -> Self {
        Self {
            auth_type,
            param_name,
        }
    }

    fn required_param(&self) -> Result<&str> {
        match self.param_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(GatewayError::InvalidInput(format!(
                "authType '{}' requires authParamName",
                self.auth_type
            ))),
        }
    }
}

/// Final shape of an outbound request after injection.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: HeaderMap,
}

/// Attach `secret` to a request for `target_url`.
///
/// Content-Type and User-Agent defaults are set first, so a `header`
/// injection naming either of them replaces the default.
pub fn inject(target_url: &str, secret: &str, injection: &Injection) -> Result<PreparedRequest> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(GATEWAY_USER_AGENT));

    let mut url = target_url.to_string();

    match injection.auth_type {
        AuthType::Bearer => {
            headers.insert(AUTHORIZATION, sensitive_value(&format!("Bearer {}", secret))?);
        }
        AuthType::Basic => {
            let encoded = STANDARD.encode(secret.as_bytes());
            headers.insert(AUTHORIZATION, sensitive_value(&format!("Basic {}", encoded))?);
        }
        AuthType::Header => {
            let name = injection.required_param()?;
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                GatewayError::InvalidInput(format!("invalid header name: {}", name))
            })?;
            headers.insert(name, sensitive_value(secret)?);
        }
        AuthType::QueryParam => {
            let name = injection.required_param()?;
            url = set_query_param(target_url, name, secret)?;
        }
    }

    Ok(PreparedRequest { url, headers })
}

fn sensitive_value(value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value).map_err(|_| {
        GatewayError::InvalidInput("credential contains characters not allowed in a header".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Set `name=value` on the URL, replacing the first existing occurrence in
/// place and dropping any duplicates. All other parameters keep their order.
fn set_query_param(target_url: &str, name: &str, value: &str) -> Result<String> {
    let mut parsed = url::Url::parse(target_url)
        .map_err(|e| GatewayError::InvalidInput(format!("invalid URL '{}': {}", target_url, e)))?;

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut replaced = false;
    for (k, v) in parsed.query_pairs() {
        if k == name {
            if !replaced {
                pairs.push((k.into_owned(), value.to_string()));
                replaced = true;
            }
        } else {
            pairs.push((k.into_owned(), v.into_owned()));
        }
    }
    if !replaced {
        pairs.push((name.to_string(), value.to_string()));
    }

    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(parsed.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn header<'a>(prepared: &'a PreparedRequest, name: &str) -> Option<&'a str> {
        prepared.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_bearer() {
        let out = inject(
            "https://api.github.com/user",
            "ghp_abc",
            &Injection::new(AuthType::Bearer, None),
        )
        .unwrap();
        assert_eq!(out.url, "https://api.github.com/user");
        assert_eq!(header(&out, "authorization"), Some("Bearer ghp_abc"));
        assert_eq!(header(&out, "content-type"), Some("application/json"));
        assert!(header(&out, "user-agent").unwrap().starts_with("shellgate/"));
        assert!(out.headers.get("authorization").unwrap().is_sensitive());
    }

    #[test]
    fn test_basic_encodes_secret_verbatim() {
        let out = inject(
            "https://example.com",
            "user:pass",
            &Injection::new(AuthType::Basic, None),
        )
        .unwrap();
        assert_eq!(header(&out, "authorization"), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn test_custom_header() {
        let out = inject(
            "https://example.com",
            "k-123",
            &Injection::new(AuthType::Header, Some("X-Api-Key".to_string())),
        )
        .unwrap();
        assert_eq!(header(&out, "x-api-key"), Some("k-123"));
        assert!(out.headers.get("authorization").is_none());
    }

    #[test]
    fn test_custom_header_overrides_default() {
        let out = inject(
            "https://example.com",
            "text/plain",
            &Injection::new(AuthType::Header, Some("Content-Type".to_string())),
        )
        .unwrap();
        assert_eq!(header(&out, "content-type"), Some("text/plain"));
        assert_eq!(out.headers.get_all("content-type").iter().count(), 1);
    }

    #[test]
    fn test_header_requires_param_name() {
        let err = inject(
            "https://example.com",
            "k",
            &Injection::new(AuthType::Header, None),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));

        let err = inject(
            "https://example.com",
            "k",
            &Injection::new(AuthType::Header, Some("  ".to_string())),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }

    #[test]
    fn test_queryparam_appends() {
        let out = inject(
            "https://maps.example.com/geo?q=paris",
            "s3cret",
            &Injection::new(AuthType::QueryParam, Some("api_key".to_string())),
        )
        .unwrap();
        assert_eq!(out.url, "https://maps.example.com/geo?q=paris&api_key=s3cret");
        assert!(out.headers.get("authorization").is_none());
    }

    #[test]
    fn test_queryparam_overwrites_in_place() {
        let out = inject(
            "https://example.com/x?api_key=phantom&a=1&api_key=dup",
            "real",
            &Injection::new(AuthType::QueryParam, Some("api_key".to_string())),
        )
        .unwrap();
        assert_eq!(out.url, "https://example.com/x?api_key=real&a=1");
    }

    #[test]
    fn test_queryparam_requires_param_name() {
        let err = inject(
            "https://example.com",
            "k",
            &Injection::new(AuthType::QueryParam, None),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }

    #[test]
    fn test_queryparam_invalid_url() {
        let err = inject(
            "not a url",
            "k",
            &Injection::new(AuthType::QueryParam, Some("key".to_string())),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }

    #[test]
    fn test_auth_type_parse_is_closed() {
        assert_eq!("bearer".parse::<AuthType>().unwrap(), AuthType::Bearer);
        assert_eq!("queryparam".parse::<AuthType>().unwrap(), AuthType::QueryParam);
        assert!("oauth".parse::<AuthType>().is_err());
        assert!("Bearer".parse::<AuthType>().is_err());
    }

    #[test]
    fn test_auth_type_serde_names() {
        let parsed: AuthType = serde_json::from_str("\"queryparam\"").unwrap();
        assert_eq!(parsed, AuthType::QueryParam);
        assert!(serde_json::from_str::<AuthType>("\"digest\"").is_err());
    }

    #[test]
    fn test_secret_with_newline_rejected() {
        let err = inject(
            "https://example.com",
            "evil\r\nX-Injected: 1",
            &Injection::new(AuthType::Bearer, None),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }
}
