pub mod env;
pub mod loader;
pub mod models;
pub mod spec;
pub mod validation;

pub use loader::load_config;
pub use models::*;
pub use spec::{ServiceSpec, SessionAffinity, TenantSpec, Upstream, UpstreamScheme};
pub use validation::{ConfigError, ConfigValidator, ResolvedConfig, ValidationResult};
