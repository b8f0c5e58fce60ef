//! SSRF guard for execute targets.
//!
//! Resolves the URL's host and rejects it if any resolved address falls in a
//! private, loopback or link-local range. Resolution failure is treated as
//! unsafe: a host we cannot resolve is never "probably fine".
//!
//! The check validates addresses at check time only. The outbound client
//! resolves again when it connects, so a host that changes its answer between
//! the two lookups is not caught here.

use async_trait::async_trait;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Outcome of an SSRF check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsrfVerdict {
    /// Every resolved address is public.
    Safe,
    /// The URL could not be parsed or has no host.
    InvalidUrl,
    /// DNS resolution failed or returned nothing.
    Unresolvable { host: String },
    /// A resolved address is in a denied range.
    PrivateAddress { ip: IpAddr, cidr: IpNet },
}

impl SsrfVerdict {
    #[must_use]
    pub fn is_safe(&self) -> bool {
        matches!(self, SsrfVerdict::Safe)
    }

    /// A human-readable reason for the decision
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            SsrfVerdict::Safe => "all resolved addresses are public".to_string(),
            SsrfVerdict::InvalidUrl => "URL has no resolvable host".to_string(),
            SsrfVerdict::Unresolvable { host } => format!("could not resolve {}", host),
            SsrfVerdict::PrivateAddress { ip, cidr } => {
                format!("resolved IP {} is in private range {}", ip, cidr)
            }
        }
    }
}

/// Hostname resolution, injectable so tests need no real DNS.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolves through the operating system via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Ranges a target may never resolve into.
fn deny_cidrs() -> Vec<IpNet> {
    let ranges = [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "0.0.0.0/8",
        "::1/128",
        "::/128",
        "fc00::/7",
        "fe80::/10",
    ];
    ranges
        .iter()
        .filter_map(|s| s.parse::<IpNet>().ok())
        .collect()
}

/// Checks URLs against the private-range deny list.
#[derive(Clone)]
pub struct SsrfGuard {
    resolver: Arc<dyn Resolver>,
    deny_cidrs: Vec<IpNet>,
}

impl std::fmt::Debug for SsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrfGuard")
            .field("deny_cidrs", &self.deny_cidrs)
            .finish_non_exhaustive()
    }
}

impl Default for SsrfGuard {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

impl SsrfGuard {
    #[must_use]
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            deny_cidrs: deny_cidrs(),
        }
    }

    /// Whether `url` is safe to call.
    pub async fn is_safe_url(&self, url: &str) -> bool {
        self.check_url(url).await.is_safe()
    }

    /// Check `url` and explain the decision.
    pub async fn check_url(&self, url: &str) -> SsrfVerdict {
        let Ok(parsed) = url::Url::parse(url) else {
            return SsrfVerdict::InvalidUrl;
        };
        let ips = match parsed.host() {
            Some(url::Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
            Some(url::Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
            Some(url::Host::Domain(host)) => match self.resolver.resolve(host).await {
                Ok(ips) if !ips.is_empty() => ips,
                Ok(_) => {
                    return SsrfVerdict::Unresolvable {
                        host: host.to_string(),
                    }
                }
                Err(e) => {
                    debug!("DNS resolution failed for {}: {}", host, e);
                    return SsrfVerdict::Unresolvable {
                        host: host.to_string(),
                    };
                }
            },
            None => return SsrfVerdict::InvalidUrl,
        };
        self.check_ips(&ips)
    }

    /// Check already-resolved addresses.
    #[must_use]
    pub fn check_ips(&self, ips: &[IpAddr]) -> SsrfVerdict {
        for ip in ips {
            // Unwrap IPv4-mapped IPv6 so ::ffff:127.0.0.1 hits 127/8.
            let ip = ip.to_canonical();
            for cidr in &self.deny_cidrs {
                if cidr.contains(&ip) {
                    return SsrfVerdict::PrivateAddress { ip, cidr: *cidr };
                }
            }
        }
        SsrfVerdict::Safe
    }
}
