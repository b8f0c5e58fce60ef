//! Raw HTTP/1.1 request head handling.
//!
//! The listener reads each request head itself, before any router sees the
//! connection, so CONNECT and WebSocket upgrades can be intercepted. The raw
//! bytes are kept: a WebSocket relay replays them verbatim and every other
//! request is handed to the router with the head re-attached.

use crate::error::{ProxyError, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum total size of a request head (64 KiB). Prevents OOM from
/// malicious clients sending unbounded header data.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// A parsed request line plus headers.
#[derive(Debug, Clone)]
pub struct RawHead {
    /// Exact bytes read, through the terminating empty line.
    pub raw: Vec<u8>,
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RawHead {
    /// First value of header `name`, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request target without its query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    #[must_use]
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
    }
}

/// Read one request head.
///
/// Returns `Ok(None)` when the client disconnects before sending anything.
/// Leading blank lines are skipped. Bytes past the head stay in `reader`'s
/// buffer for the caller to collect.
pub async fn read_head<R>(reader: &mut R) -> Result<Option<RawHead>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let mut line_start = 0;
    loop {
        let remaining = MAX_HEAD_SIZE.saturating_sub(raw.len());
        if remaining == 0 {
            return Err(ProxyError::HeaderTooLarge {
                limit: MAX_HEAD_SIZE,
            });
        }
        let n = AsyncReadExt::take(&mut *reader, remaining as u64)
            .read_until(b'\n', &mut raw)
            .await?;
        if n == 0 {
            if raw.is_empty() {
                return Ok(None);
            }
            return Err(ProxyError::HttpParse(
                "connection closed before end of request head".to_string(),
            ));
        }
        if !raw.ends_with(b"\n") {
            if n == remaining {
                return Err(ProxyError::HeaderTooLarge {
                    limit: MAX_HEAD_SIZE,
                });
            }
            return Err(ProxyError::HttpParse(
                "connection closed before end of request head".to_string(),
            ));
        }

        let line = &raw[line_start..];
        if line == b"\r\n" || line == b"\n" {
            if line_start == 0 {
                raw.clear();
                continue;
            }
            break;
        }
        line_start = raw.len();
    }
    parse_head(raw).map(Some)
}

fn parse_head(raw: Vec<u8>) -> Result<RawHead> {
    let text = std::str::from_utf8(&raw)
        .map_err(|_| ProxyError::HttpParse("request head is not valid UTF-8".to_string()))?;
    let mut lines = text.lines();

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ProxyError::HttpParse(format!(
            "malformed request line: {}",
            request_line
        )));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(ProxyError::HttpParse(format!(
            "unsupported protocol version: {}",
            version
        )));
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ProxyError::HttpParse(format!("malformed header: {}", line)));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let method = method.to_string();
    let target = target.to_string();
    Ok(RawHead {
        raw,
        method,
        target,
        headers,
    })
}

/// Write a bare status line with optional headers.
///
/// Anything but a 2xx also carries `Content-Length: 0` and
/// `Connection: close`; the caller closes the socket afterwards.
pub async fn write_status<W>(
    stream: &mut W,
    status: u16,
    reason: &str,
    headers: &[(&str, &str)],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut response = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    if !(200..300).contains(&status) {
        response.push_str("Content-Length: 0\r\nConnection: close\r\n");
    }
    response.push_str("\r\n");
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Reason phrase for the statuses written by the raw handlers.
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Error")
}
