//! Virtual-host dispatch for the plain HTTP listener.
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    core::{
        director::request_host,
        naming::join_skip_empty,
        topology::{Route, RoutingTable},
    },
    ports::overlay::OverlayTransport,
};

/// Outcome of a host lookup.
pub enum Resolution<'a> {
    /// The host is in the routing table.
    Exact(&'a Route),
    /// The host is unknown; the default host answers.
    DefaultHost(&'a Route),
    /// Neither the host nor the default host is routed.
    Status,
}

#[derive(Debug, Serialize)]
pub struct HostEntry {
    pub host: String,
    pub service: String,
    pub tenant: String,
}

/// Body of the built-in status endpoint.
#[derive(Debug, Serialize)]
pub struct GatewayStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub hosts: Vec<HostEntry>,
    pub overlay_services: Vec<String>,
    pub overlay_routes: Vec<String>,
}

pub struct Switchboard {
    routes: RoutingTable,
    default_host: String,
    overlay: Arc<dyn OverlayTransport>,
}

impl Switchboard {
    /// The default host is `<default_fragment>.<first system alias>`.
    pub fn new(
        routes: RoutingTable,
        system_hosts: &[String],
        default_fragment: &str,
        overlay: Arc<dyn OverlayTransport>,
    ) -> Self {
        let first_alias = system_hosts.first().map(String::as_str).unwrap_or("");
        Self {
            routes,
            default_host: join_skip_empty(&[default_fragment, first_alias]),
            overlay,
        }
    }

    pub fn default_host(&self) -> &str {
        &self.default_host
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn resolve(&self, host: &str) -> Resolution<'_> {
        if let Some(route) = self.routes.get(host) {
            return Resolution::Exact(route);
        }
        match self.routes.get(&self.default_host) {
            Some(route) => Resolution::DefaultHost(route),
            None => Resolution::Status,
        }
    }

    pub async fn dispatch(&self, req: Request) -> Response {
        let (head, body) = req.into_parts();
        let host = request_host(&head);
        let req = Request::from_parts(head, body);

        match self.resolve(&host) {
            Resolution::Exact(route) => route.forwarder.handle(req).await,
            Resolution::DefaultHost(route) => {
                tracing::debug!(host = %host, default = %self.default_host, "Unknown host, using default");
                route.forwarder.handle(req).await
            }
            Resolution::Status => {
                tracing::debug!(host = %host, "Unknown host, serving status");
                self.status().await.into_response()
            }
        }
    }

    pub async fn status(&self) -> Json<GatewayStatus> {
        let hosts = self
            .routes
            .hosts()
            .into_iter()
            .filter_map(|host| {
                self.routes.get(host).map(|route| HostEntry {
                    host: host.to_string(),
                    service: route.service.clone(),
                    tenant: route.tenant.clone(),
                })
            })
            .collect();

        Json(GatewayStatus {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            timestamp: chrono::Utc::now().to_rfc3339(),
            hosts,
            overlay_services: self.overlay.services().await,
            overlay_routes: self.overlay.routes().await,
        })
    }

    /// Router answering every path and method through [`Switchboard::dispatch`].
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(dispatch_handler).with_state(self)
    }
}

async fn dispatch_handler(State(switchboard): State<Arc<Switchboard>>, req: Request<Body>) -> Response {
    switchboard.dispatch(req).await
}
