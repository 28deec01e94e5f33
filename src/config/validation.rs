//! Resolution of a raw [`GatewayConfig`] into typed specs.
//!
//! Every failure here is a fatal configuration error: the gateway never starts serving a
//! partially valid topology.
use std::time::Duration;

use crate::config::{
    models::{COMMON_TENANT, GatewayConfig, ServiceConfig, SessionConfig},
    spec::{
        DEFAULT_DIAL_TIMEOUT, ServiceSpec, SessionAffinity, TenantSpec, Upstream, UpstreamScheme,
    },
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ConfigError>;

/// Sticky field installed on registry-routed services unless configured otherwise.
pub const DEFAULT_STICKY_FIELD: &str = "client_uid";

/// Fatal configuration errors.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("UPSTREAM not configured for service '{service}'")]
    MissingUpstream { service: String },

    #[error("HOST not configured for service '{service}'")]
    MissingHosts { service: String },

    #[error("Invalid upstream '{value}' for service '{service}': {reason}")]
    InvalidUpstream {
        service: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported upstream scheme '{scheme}' for service '{service}'")]
    UnsupportedScheme { service: String, scheme: String },

    #[error("Invalid dial timeout '{value}' for service '{service}': {reason}")]
    InvalidTimeout {
        service: String,
        value: String,
        reason: String,
    },

    #[error("Invalid port for '{field}': {value}")]
    InvalidPort { field: String, value: String },

    #[error("Unknown parameter '{parameter}' in '{variable}'")]
    UnknownParameter { variable: String, parameter: String },

    #[error("Tenant '{tenant}' overrides '{service}' with undeclared service '{target}'")]
    UnknownOverrideTarget {
        tenant: String,
        service: String,
        target: String,
    },

    #[error("Tenant '{tenant}' overrides undeclared service '{service}'")]
    UnknownOverrideSource { tenant: String, service: String },

    #[error("Service '{service}' uses the forward scheme and cannot pin sessions")]
    ConflictingDirectors { service: String },

    #[error("Multiple usage of HOST '{host}' ({existing} and {incoming})")]
    HostCollision {
        host: String,
        existing: String,
        incoming: String,
    },

    #[error("Service '{service}' declared more than once")]
    DuplicateService { service: String },

    #[error("No system host aliases configured")]
    MissingSystemHosts,
}

/// A configuration that passed validation, ready for the topology builder.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub http_port: u16,
    pub overlay_port: u16,
    pub system_hosts: Vec<String>,
    pub default_fragment: String,
    /// Sorted by name.
    pub services: Vec<ServiceSpec>,
    /// Sorted by name; always contains the common tenant.
    pub tenants: Vec<TenantSpec>,
}

/// Gateway configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate and resolve the entire gateway configuration.
    pub fn resolve(config: &GatewayConfig) -> ValidationResult<ResolvedConfig> {
        let system_hosts: Vec<String> = config
            .system_hosts
            .iter()
            .map(|alias| alias.trim().to_string())
            .filter(|alias| !alias.is_empty())
            .collect();
        if system_hosts.is_empty() {
            return Err(ConfigError::MissingSystemHosts);
        }

        for (field, port) in [
            ("http_port", config.http_port),
            ("overlay_port", config.overlay_port),
        ] {
            if port == 0 {
                return Err(ConfigError::InvalidPort {
                    field: field.to_string(),
                    value: port.to_string(),
                });
            }
        }

        let mut names: Vec<&String> = config.services.keys().collect();
        names.sort();
        let services = names
            .into_iter()
            .map(|name| Self::resolve_service(name, &config.services[name]))
            .collect::<ValidationResult<Vec<_>>>()?;

        Ok(ResolvedConfig {
            http_port: config.http_port,
            overlay_port: config.overlay_port,
            system_hosts,
            default_fragment: config.default_fragment.trim().to_string(),
            services,
            tenants: Self::resolve_tenants(config),
        })
    }

    /// Resolve a single service declaration.
    pub fn resolve_service(name: &str, config: &ServiceConfig) -> ValidationResult<ServiceSpec> {
        let raw_upstream = config
            .upstream
            .as_deref()
            .ok_or_else(|| ConfigError::MissingUpstream {
                service: name.to_string(),
            })?;
        let upstream = Upstream::parse(name, raw_upstream)?;

        if config.hosts.is_empty() {
            return Err(ConfigError::MissingHosts {
                service: name.to_string(),
            });
        }
        let virtual_hosts = config
            .hosts
            .iter()
            .map(|fragment| fragment.trim().to_string())
            .collect();

        let dial_timeout = match config.dial_timeout.as_deref() {
            Some(raw) => Self::parse_timeout(name, raw)?,
            None => DEFAULT_DIAL_TIMEOUT,
        };

        let (session, sticky_field) = match upstream.scheme {
            UpstreamScheme::HostnameForward => {
                if config.session.is_some() || config.sticky_field.is_some() {
                    return Err(ConfigError::ConflictingDirectors {
                        service: name.to_string(),
                    });
                }
                (None, None)
            }
            UpstreamScheme::OverlayRegistry => (
                Some(config.session.clone().unwrap_or_default()),
                Some(
                    config
                        .sticky_field
                        .clone()
                        .unwrap_or_else(|| DEFAULT_STICKY_FIELD.to_string()),
                ),
            ),
            UpstreamScheme::PlainHttp | UpstreamScheme::Overlay => {
                (config.session.clone(), config.sticky_field.clone())
            }
        };

        Ok(ServiceSpec {
            name: name.to_string(),
            upstream,
            dial_timeout,
            virtual_hosts,
            session: session
                .map(|session| Self::resolve_session(name, session))
                .transpose()?,
            sticky_field: sticky_field.filter(|field| !field.trim().is_empty()),
        })
    }

    /// Tenants sorted by name, with the common tenant always present.
    pub fn resolve_tenants(config: &GatewayConfig) -> Vec<TenantSpec> {
        let mut tenants: Vec<TenantSpec> = config
            .tenants
            .iter()
            .map(|(name, tenant)| TenantSpec {
                name: name.clone(),
                id: tenant.id.trim().to_string(),
                overrides: tenant.overrides.clone(),
            })
            .collect();
        if !tenants.iter().any(|tenant| tenant.name == COMMON_TENANT) {
            tenants.push(TenantSpec::common());
        }
        tenants.sort_by(|a, b| a.name.cmp(&b.name));
        tenants
    }

    fn parse_timeout(service: &str, raw: &str) -> ValidationResult<Duration> {
        let timeout =
            humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::InvalidTimeout {
                service: service.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            })?;
        // A zero timeout means "unset", like an absent one.
        if timeout.is_zero() {
            return Ok(DEFAULT_DIAL_TIMEOUT);
        }
        Ok(timeout)
    }

    fn resolve_session(service: &str, session: SessionConfig) -> ValidationResult<SessionAffinity> {
        if session.virtual_port == 0 {
            return Err(ConfigError::InvalidPort {
                field: format!("service '{service}' session.virtual_port"),
                value: "0".to_string(),
            });
        }
        Ok(SessionAffinity {
            field: session.field,
            virtual_port: session.virtual_port,
        })
    }
}
