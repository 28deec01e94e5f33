//! Resolved, typed service and tenant declarations.
//!
//! Everything in here has already passed validation: an upstream is always present, every
//! service has at least one virtual-host fragment and durations are parsed. The topology
//! builder only ever sees these types.
use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use http::uri::Authority;

use crate::config::validation::ConfigError;

/// Dial timeout applied when a service does not configure one.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream scheme, which selects both the dial strategy and the director chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpstreamScheme {
    /// Direct TCP with keep-alive.
    PlainHttp,
    /// Overlay transport, primary dial primitive.
    #[default]
    Overlay,
    /// Overlay transport through the registry-aware dial primitive.
    OverlayRegistry,
    /// Transparent pass-through keyed by the inbound Host header.
    HostnameForward,
}

impl UpstreamScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamScheme::PlainHttp => "http",
            UpstreamScheme::Overlay => "overlay",
            UpstreamScheme::OverlayRegistry => "overlay-registry",
            UpstreamScheme::HostnameForward => "forward",
        }
    }
}

impl FromStr for UpstreamScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(UpstreamScheme::PlainHttp),
            "" | "overlay" | "shttp" => Ok(UpstreamScheme::Overlay),
            "overlay-registry" | "hotcore" => Ok(UpstreamScheme::OverlayRegistry),
            "forward" => Ok(UpstreamScheme::HostnameForward),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for UpstreamScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheme plus host of a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub scheme: UpstreamScheme,
    /// `host[:port]`; may be empty only for [`UpstreamScheme::HostnameForward`].
    pub host: String,
}

impl Upstream {
    /// Parse `[scheme://]host[:port]` on behalf of `service`.
    pub fn parse(service: &str, raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (
                scheme
                    .parse::<UpstreamScheme>()
                    .map_err(|scheme| ConfigError::UnsupportedScheme {
                        service: service.to_string(),
                        scheme,
                    })?,
                rest,
            ),
            None => (UpstreamScheme::default(), raw),
        };

        let host = rest.strip_suffix('/').unwrap_or(rest);
        if host.contains('/') {
            return Err(ConfigError::InvalidUpstream {
                service: service.to_string(),
                value: raw.to_string(),
                reason: "upstream must not carry a path".to_string(),
            });
        }

        if host.is_empty() {
            if scheme == UpstreamScheme::HostnameForward {
                return Ok(Self {
                    scheme,
                    host: String::new(),
                });
            }
            return Err(ConfigError::MissingUpstream {
                service: service.to_string(),
            });
        }

        host.parse::<Authority>()
            .map_err(|e| ConfigError::InvalidUpstream {
                service: service.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            scheme,
            host: host.to_string(),
        })
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)
    }
}

/// Session-token affinity: the request field holding the token and the fixed port of the
/// pinned instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAffinity {
    pub field: String,
    pub virtual_port: u16,
}

/// One backend service declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub upstream: Upstream,
    pub dial_timeout: Duration,
    pub virtual_hosts: Vec<String>,
    pub session: Option<SessionAffinity>,
    pub sticky_field: Option<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, upstream: Upstream, virtual_hosts: &[&str]) -> Self {
        Self {
            name: name.into(),
            upstream,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            virtual_hosts: virtual_hosts.iter().map(|h| h.to_string()).collect(),
            session: None,
            sticky_field: None,
        }
    }

    pub fn with_session(mut self, field: impl Into<String>, virtual_port: u16) -> Self {
        self.session = Some(SessionAffinity {
            field: field.into(),
            virtual_port,
        });
        self
    }

    pub fn with_sticky_field(mut self, field: impl Into<String>) -> Self {
        self.sticky_field = Some(field.into());
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }
}

/// One routing namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSpec {
    pub name: String,
    /// Hostname segment; empty contributes nothing.
    pub id: String,
    pub overrides: HashMap<String, String>,
}

impl TenantSpec {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            overrides: HashMap::new(),
        }
    }

    /// The namespace-less default tenant.
    pub fn common() -> Self {
        Self::new(crate::config::COMMON_TENANT, "")
    }

    pub fn with_override(mut self, service: impl Into<String>, target: impl Into<String>) -> Self {
        self.overrides.insert(service.into(), target.into());
        self
    }
}
