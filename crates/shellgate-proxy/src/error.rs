//! Error types for the shellgate-proxy crate.

use shellgate::GatewayError;
use thiserror::Error;

/// Errors raised while serving a connection.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Gateway bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP parse error: {0}")]
    HttpParse(String),

    #[error("Request head exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hyper::Error> for ProxyError {
    fn from(e: hyper::Error) -> Self {
        ProxyError::HttpParse(e.to_string())
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
