//! Configuration from process environment variables.
//!
//! Grammar:
//! * `SRV_<NAME>_<PARAM>` with `PARAM` one of `UPSTREAM`, `TIMEOUT`, `HOST`, `SESSION`,
//!   `VPORT`, `STICKY`
//! * `KEY_<NAME>_ID` declares a tenant and its hostname segment
//! * `STAGE_<NAME>_<SERVICE>=<substitute>` adds a tenant override
//! * `HTTP_PORT`, `OVERLAY_PORT`, `SYSTEM_HOSTS`, `DEFAULT_FRAGMENT`
//!
//! Names capture greedily, so the parameter is whatever follows the last underscore.
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{
    models::{COMMON_TENANT, GatewayConfig, SessionConfig},
    validation::{ConfigError, ValidationResult},
};

static SERVICE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SRV_([A-Z0-9_]*)_([A-Z0-9_]*)$").expect("valid SRV regex"));
static TENANT_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^KEY_([A-Z0-9_]*)_([A-Z0-9_]*)$").expect("valid KEY regex"));
static STAGE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^STAGE_([A-Z0-9_]*)_([A-Z0-9_]*)$").expect("valid STAGE regex"));

/// Build a configuration from the current process environment.
pub fn from_env() -> ValidationResult<GatewayConfig> {
    from_vars(std::env::vars())
}

/// Build a configuration from `(name, value)` pairs.
pub fn from_vars<I, K, V>(vars: I) -> ValidationResult<GatewayConfig>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut config = GatewayConfig::default();

    for (key, value) in vars {
        let (key, value) = (key.as_ref(), value.as_ref());

        if let Some(captures) = SERVICE_VAR.captures(key) {
            apply_service_param(&mut config, key, &captures[1], &captures[2], value)?;
            continue;
        }

        if let Some(captures) = TENANT_VAR.captures(key) {
            match &captures[2] {
                "ID" => {
                    config
                        .tenants
                        .entry(tenant_name(&captures[1]))
                        .or_default()
                        .id = value.to_string();
                }
                other => {
                    return Err(ConfigError::UnknownParameter {
                        variable: key.to_string(),
                        parameter: other.to_string(),
                    });
                }
            }
            continue;
        }

        if let Some(captures) = STAGE_VAR.captures(key) {
            config
                .tenants
                .entry(tenant_name(&captures[1]))
                .or_default()
                .overrides
                .insert(captures[2].to_string(), value.to_string());
            continue;
        }

        match key {
            "HTTP_PORT" => config.http_port = parse_port(key, value)?,
            "OVERLAY_PORT" => config.overlay_port = parse_port(key, value)?,
            "SYSTEM_HOSTS" => config.system_hosts = split_list(value),
            "DEFAULT_FRAGMENT" => config.default_fragment = value.trim().to_string(),
            _ => tracing::debug!("Skipping environment variable {}", key),
        }
    }

    Ok(config)
}

fn apply_service_param(
    config: &mut GatewayConfig,
    variable: &str,
    service: &str,
    param: &str,
    value: &str,
) -> ValidationResult<()> {
    let service = config.services.entry(service.to_string()).or_default();
    match param {
        "UPSTREAM" => service.upstream = Some(value.to_string()),
        "TIMEOUT" => service.dial_timeout = Some(value.to_string()),
        "HOST" => service.hosts = value.split(',').map(|h| h.trim().to_string()).collect(),
        "SESSION" => {
            service
                .session
                .get_or_insert_with(SessionConfig::default)
                .field = value.trim().to_string()
        }
        "VPORT" => {
            service
                .session
                .get_or_insert_with(SessionConfig::default)
                .virtual_port = parse_port(variable, value)?
        }
        "STICKY" => service.sticky_field = Some(value.trim().to_string()),
        other => {
            return Err(ConfigError::UnknownParameter {
                variable: variable.to_string(),
                parameter: other.to_string(),
            });
        }
    }
    Ok(())
}

/// `KEY_COMMON_*` and `STAGE_COMMON_*` address the built-in common tenant.
fn tenant_name(captured: &str) -> String {
    if captured.eq_ignore_ascii_case(COMMON_TENANT) {
        COMMON_TENANT.to_string()
    } else {
        captured.to_string()
    }
}

fn parse_port(field: &str, value: &str) -> ValidationResult<u16> {
    value.trim().parse().map_err(|_| ConfigError::InvalidPort {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
