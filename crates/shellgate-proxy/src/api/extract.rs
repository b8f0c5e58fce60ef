//! Request guards for the three kinds of caller.

use super::error::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use cookie::time::Duration;
use shellgate::auth::{self, ADMIN_KEY_HEADER, SESSION_COOKIE};
use shellgate::model::Crab;
use shellgate::GatewayError;

fn header<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Session token from the request cookies, if present.
pub fn session_token(jar: &CookieJar) -> Option<&str> {
    jar.get(SESSION_COOKIE).map(|c| c.value())
}

/// The session cookie with its fixed attributes.
#[must_use]
pub fn session_cookie(token: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(max_age)
        .secure(secure)
        .build()
}

/// Cookie that clears the session in the browser.
#[must_use]
pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    session_cookie(String::new(), Duration::ZERO, secure)
}

/// Caller presented the admin API key.
#[derive(Debug, Clone, Copy)]
pub struct AdminKey;

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state
            .admin
            .check_key(header(&parts.headers, ADMIN_KEY_HEADER))?;
        Ok(AdminKey)
    }
}

/// Caller presented a valid agent bearer token.
#[derive(Debug, Clone)]
pub struct Agent(pub Crab);

#[axum::async_trait]
impl FromRequestParts<AppState> for Agent {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let crab =
            auth::authenticate_agent(&*state.store, header(&parts.headers, AUTHORIZATION)).await?;
        Ok(Agent(crab))
    }
}

/// Caller holds a valid admin session cookie.
#[derive(Debug, Clone, Copy)]
pub struct AdminSession;

/// Rejection that also clears a stale session cookie.
pub struct SessionRejection {
    error: ApiError,
    secure: bool,
}

impl SessionRejection {
    #[must_use]
    pub fn new(error: GatewayError, secure: bool) -> Self {
        Self {
            error: ApiError(error),
            secure,
        }
    }
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        if matches!(self.error.0, GatewayError::Unauthorized(_)) {
            let jar = CookieJar::new().add(clear_session_cookie(self.secure));
            (jar, self.error).into_response()
        } else {
            self.error.into_response()
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = SessionRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        state
            .admin
            .check_session(&*state.store, session_token(&jar))
            .await
            .map_err(|e| SessionRejection::new(e, state.config.secure_cookies))?;
        Ok(AdminSession)
    }
}
