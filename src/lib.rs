//! Meshgate - a multi-tenant, virtual-host-aware reverse-proxy gateway.
//!
//! Meshgate fronts a set of named backend services and publishes each of them under
//! fully-qualified virtual hostnames built from a service fragment, a tenant segment and one
//! of the gateway's system aliases. Traffic arrives over two listeners at once: an overlay
//! transport where every hostname is bound as a name, and a plain HTTP port that dispatches
//! on the `Host` header.
//!
//! # Features
//! - Hostname expansion of services x tenants x aliases with collision detection
//! - Per-tenant service overrides
//! - Direct TCP (keep-alive) or overlay upstreams, including a registry-aware dial
//! - Sticky and session-token affinity read from form or query fields
//! - Transparent hostname pass-through
//! - Configuration from YAML / TOML / JSON files or `SRV_*` / `KEY_*` / `STAGE_*` variables
//! - Structured tracing via `tracing`, graceful shutdown on SIGINT / SIGTERM
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use meshgate::{
//!     adapters::{GatewayServer, LocalOverlay},
//!     config::{ConfigValidator, loader::load_config},
//!     core::Topology,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = ConfigValidator::resolve(&load_config("gateway.yaml").await?)?;
//! let overlay = Arc::new(LocalOverlay::new());
//! let topology = Topology::from_config(&config, overlay.clone())?;
//! GatewayServer::new(&config, topology, overlay)
//!     .run(CancellationToken::new())
//!     .await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! routing logic inside `core`. The overlay transport is a port: the gateway only dials,
//! binds and accepts through [`ports::OverlayTransport`].
//!
//! # Error Handling
//! Configuration problems surface as [`config::ConfigError`] and abort startup. Per-request
//! failures are [`core::ForwardError`] values rendered as 4xx / 5xx responses. Binary-level
//! plumbing uses `eyre::Result<T>` with `WrapErr` context.
//!
//! # Concurrency & Data Structures
//! The routing table is immutable after startup and shared by `Arc`. Registries that change
//! at runtime use `scc::HashMap`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{GatewayServer, LocalOverlay},
    core::{Switchboard, Topology},
    ports::OverlayTransport,
    utils::GracefulShutdown,
};
