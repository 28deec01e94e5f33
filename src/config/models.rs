//! Configuration data structures for meshgate.
//!
//! These types map directly to YAML (also TOML / JSON) configuration files and are also
//! produced by the environment loader in [`crate::config::env`]. They are raw, serde‑friendly
//! declarations; [`crate::config::validation`] resolves them into the typed specs the
//! topology builder consumes.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Name of the tenant that contributes no namespace segment to hostnames.
pub const COMMON_TENANT: &str = "common";

fn default_http_port() -> u16 {
    8080
}

fn default_overlay_port() -> u16 {
    10000
}

fn default_session_field() -> String {
    "session".to_string()
}

fn default_virtual_port() -> u16 {
    13337
}

/// Top level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Port of the conventional HTTP listener.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Port the overlay transport bridge listens on.
    #[serde(default = "default_overlay_port")]
    pub overlay_port: u16,
    /// Base domains the gateway answers to.
    #[serde(default)]
    pub system_hosts: Vec<String>,
    /// Fragment of the fallback virtual host (`join(fragment, system_hosts[0])`).
    #[serde(default)]
    pub default_fragment: String,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    #[serde(default)]
    pub tenants: HashMap<String, TenantConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            overlay_port: default_overlay_port(),
            system_hosts: Vec::new(),
            default_fragment: String::new(),
            services: HashMap::new(),
            tenants: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

/// One backend service declaration as written by the operator.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// `[scheme://]host[:port]`
    pub upstream: Option<String>,
    /// Dial timeout, parsed by humantime (e.g. "500ms", "10s").
    pub dial_timeout: Option<String>,
    /// Virtual-host fragments this service answers under.
    pub hosts: Vec<String>,
    /// Session-token affinity.
    pub session: Option<SessionConfig>,
    /// Request field carrying an instance port.
    pub sticky_field: Option<String>,
}

impl ServiceConfig {
    pub fn new(upstream: impl Into<String>, hosts: &[&str]) -> Self {
        Self {
            upstream: Some(upstream.into()),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_dial_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.dial_timeout = Some(timeout.into());
        self
    }

    pub fn with_session(mut self, field: impl Into<String>, virtual_port: u16) -> Self {
        self.session = Some(SessionConfig {
            field: field.into(),
            virtual_port,
        });
        self
    }

    pub fn with_sticky_field(mut self, field: impl Into<String>) -> Self {
        self.sticky_field = Some(field.into());
        self
    }
}

/// Session affinity descriptor `{locator-field, virtual-port}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default = "default_session_field")]
    pub field: String,
    #[serde(default = "default_virtual_port")]
    pub virtual_port: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            field: default_session_field(),
            virtual_port: default_virtual_port(),
        }
    }
}

/// A routing namespace (API key / stage).
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TenantConfig {
    /// Hostname segment; empty for the common tenant.
    pub id: String,
    /// service name -> substitute service name
    pub overrides: HashMap<String, String>,
}

impl TenantConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, service: impl Into<String>, target: impl Into<String>) -> Self {
        self.overrides.insert(service.into(), target.into());
        self
    }
}

/// Builder for GatewayConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct GatewayConfigBuilder {
    http_port: Option<u16>,
    overlay_port: Option<u16>,
    system_hosts: Vec<String>,
    default_fragment: String,
    services: HashMap<String, ServiceConfig>,
    tenants: HashMap<String, TenantConfig>,
}

impl GatewayConfigBuilder {
    /// Set the HTTP listener port
    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    /// Set the overlay bridge port
    pub fn overlay_port(mut self, port: u16) -> Self {
        self.overlay_port = Some(port);
        self
    }

    /// Add a system host alias
    pub fn system_host(mut self, alias: impl Into<String>) -> Self {
        self.system_hosts.push(alias.into());
        self
    }

    /// Set the fragment of the fallback virtual host
    pub fn default_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.default_fragment = fragment.into();
        self
    }

    /// Declare a service
    pub fn service(mut self, name: impl Into<String>, config: ServiceConfig) -> Self {
        self.services.insert(name.into(), config);
        self
    }

    /// Declare a tenant
    pub fn tenant(mut self, name: impl Into<String>, config: TenantConfig) -> Self {
        self.tenants.insert(name.into(), config);
        self
    }

    /// Build the final GatewayConfig
    pub fn build(self) -> GatewayConfig {
        GatewayConfig {
            http_port: self.http_port.unwrap_or_else(default_http_port),
            overlay_port: self.overlay_port.unwrap_or_else(default_overlay_port),
            system_hosts: self.system_hosts,
            default_fragment: self.default_fragment,
            services: self.services,
            tenants: self.tenants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_to_empty_document() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.overlay_port, 10000);
        assert!(config.services.is_empty());
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn test_session_defaults() {
        let service: ServiceConfig =
            serde_json::from_str(r#"{"upstream": "hotcore://games", "session": {}}"#).unwrap();
        let session = service.session.unwrap();
        assert_eq!(session.field, "session");
        assert_eq!(session.virtual_port, 13337);
    }

    #[test]
    fn test_builder_collects_declarations() {
        let config = GatewayConfig::builder()
            .http_port(9000)
            .system_host("example.com")
            .service("api", ServiceConfig::new("overlay://api", &["api"]))
            .tenant("acme", TenantConfig::new("acme").with_override("api", "api-canary"))
            .build();

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.overlay_port, 10000);
        assert_eq!(config.services["api"].hosts, vec!["api".to_string()]);
        assert_eq!(config.tenants["acme"].overrides["api"], "api-canary");
    }
}
