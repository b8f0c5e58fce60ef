//! Error taxonomy shared by every gateway decision.
//!
//! Each variant maps to exactly one HTTP status. Client-facing text comes from
//! [`GatewayError::public_message`], which never exposes internals for
//! server-side failures.

use thiserror::Error;

/// Errors produced while deciding on or performing a gateway operation.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing or invalid credential.
    #[error("{0}")]
    Unauthorized(String),

    /// Revoked or expired agent, or a policy / allow-list denial.
    #[error("{0}")]
    Forbidden(String),

    /// Unknown agent, secret, rule or provider.
    #[error("{0}")]
    NotFound(String),

    /// Malformed request body, URL or injection configuration.
    #[error("{0}")]
    InvalidInput(String),

    /// A unique key is already taken.
    #[error("{0}")]
    Conflict(String),

    /// The caller exhausted its request window.
    #[error("Rate limit exceeded: {limit} requests per minute")]
    RateLimited { limit: u32 },

    /// No model provider is configured or accessible for the caller.
    #[error("No model provider is configured or accessible for this agent")]
    NoProvider,

    /// Network error reaching the target.
    #[error("Upstream request failed: {0}")]
    UpstreamFailure(String),

    /// The target did not answer in time.
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// Authenticated decryption failed (tamper or wrong key).
    #[error("Credential decryption failed: {0}")]
    CryptoFailure(String),

    /// The server itself is misconfigured.
    #[error("Server configuration error: {0}")]
    InternalConfig(String),

    /// The backing store failed.
    #[error("Store error: {0}")]
    Store(String),
}

impl GatewayError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Unauthorized(_) => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::InvalidInput(_) => 400,
            GatewayError::Conflict(_) => 409,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::NoProvider => 503,
            GatewayError::UpstreamFailure(_) => 502,
            GatewayError::UpstreamTimeout => 504,
            GatewayError::CryptoFailure(_)
            | GatewayError::InternalConfig(_)
            | GatewayError::Store(_) => 500,
        }
    }

    /// Message safe to return to the caller.
    ///
    /// Client errors carry their full text. Server-side failures are reduced
    /// to a fixed string so key material, plaintext and store internals stay
    /// in the server log.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::CryptoFailure(_) => "Failed to decrypt credential".to_string(),
            GatewayError::InternalConfig(_) => "Server configuration error".to_string(),
            GatewayError::Store(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this error is the server's fault rather than the caller's.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
