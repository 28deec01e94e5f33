//! Dual-protocol front end: one overlay listener per routed hostname plus the plain HTTP
//! listener that dispatches by `Host` header.
use std::{io, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    response::Response,
    serve::Listener,
};
use eyre::{Result, WrapErr, eyre};
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::{
    config::ResolvedConfig,
    core::{Forwarder, Switchboard, Topology},
    ports::overlay::{NETWORK_TCP, OverlayListener, OverlayStream, OverlayTransport},
};

/// Network name handed to the overlay's own peer listener.
pub const OVERLAY_LISTEN_NETWORK: &str = "tcp4";

/// Adapts an overlay listener to axum's [`Listener`] contract.
struct OverlayAcceptor {
    listener: Box<dyn OverlayListener>,
}

impl Listener for OverlayAcceptor {
    type Io = OverlayStream;
    type Addr = String;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.listener.accept().await {
                Ok(accepted) => return accepted,
                Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                    tracing::debug!("Overlay listener {} closed", self.listener.name());
                    std::future::pending::<()>().await;
                }
                Err(e) => tracing::debug!("Accept error: {}", e),
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.listener.name().to_string())
    }
}

async fn forward_handler(State(forwarder): State<Arc<Forwarder>>, req: Request<Body>) -> Response {
    forwarder.handle(req).await
}

pub struct GatewayServer {
    http_addr: SocketAddr,
    overlay_addr: String,
    topology: Topology,
    switchboard: Arc<Switchboard>,
    overlay: Arc<dyn OverlayTransport>,
}

/// Listeners that are bound and serving.
pub struct RunningGateway {
    pub http_addr: SocketAddr,
    tasks: JoinSet<Result<()>>,
}

impl GatewayServer {
    pub fn new(
        config: &ResolvedConfig,
        topology: Topology,
        overlay: Arc<dyn OverlayTransport>,
    ) -> Self {
        let switchboard = Arc::new(Switchboard::new(
            topology.routes.clone(),
            &config.system_hosts,
            &config.default_fragment,
            overlay.clone(),
        ));
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], config.http_port)),
            overlay_addr: format!("0.0.0.0:{}", config.overlay_port),
            topology,
            switchboard,
            overlay,
        }
    }

    /// Override the plain HTTP bind address.
    pub fn with_http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = addr;
        self
    }

    /// Override the overlay peer listener address.
    pub fn with_overlay_addr(mut self, addr: impl Into<String>) -> Self {
        self.overlay_addr = addr.into();
        self
    }

    pub fn switchboard(&self) -> Arc<Switchboard> {
        self.switchboard.clone()
    }

    /// Bind everything, in order, and start serving.
    ///
    /// Every overlay hostname is bound first, then the overlay peer listener, then the
    /// HTTP listener. Any bind failure aborts startup.
    pub async fn start(self, shutdown: CancellationToken) -> Result<RunningGateway> {
        let mut tasks = JoinSet::new();

        for binding in &self.topology.bindings {
            let listener = self
                .overlay
                .bind(NETWORK_TCP, &binding.host)
                .await
                .wrap_err_with(|| format!("Failed while binding overlay to {}", binding.host))?;
            tracing::info!(
                "Serving overlay for {} (service {})",
                binding.host,
                binding.forwarder.service()
            );

            let app = Router::new()
                .fallback(forward_handler)
                .with_state(binding.forwarder.clone());
            let signal = shutdown.clone().cancelled_owned();
            let host = binding.host.clone();
            tasks.spawn(async move {
                axum::serve(OverlayAcceptor { listener }, app)
                    .with_graceful_shutdown(signal)
                    .await
                    .wrap_err_with(|| format!("Overlay server for {host} failed"))
            });
        }

        self.overlay
            .listen_and_serve(OVERLAY_LISTEN_NETWORK, &self.overlay_addr)
            .await
            .wrap_err_with(|| format!("Failed to start overlay listener on {}", self.overlay_addr))?;

        let listener = TcpListener::bind(self.http_addr)
            .await
            .wrap_err_with(|| format!("Failed to bind HTTP listener on {}", self.http_addr))?;
        let http_addr = listener
            .local_addr()
            .wrap_err("Failed to get local addr")?;

        for host in self.topology.routes.hosts() {
            tracing::info!("Serving HTTP for {} on {}", host, http_addr);
        }

        let app = self
            .switchboard
            .clone()
            .router()
            .layer(TraceLayer::new_for_http());
        let signal = shutdown.cancelled_owned();
        tasks.spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(signal)
            .await
            .wrap_err("HTTP server failed")
        });

        tracing::info!("Gateway listening on {http_addr}");
        Ok(RunningGateway { http_addr, tasks })
    }

    /// [`GatewayServer::start`] and wait until every listener has stopped.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.start(shutdown).await?.wait().await
    }
}

impl RunningGateway {
    /// Wait for every listener to stop; the first failure is returned.
    pub async fn wait(mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let outcome = joined
                .map_err(|e| eyre!("Listener task panicked: {e}"))
                .and_then(|result| result);
            if let Err(e) = outcome {
                tracing::error!("{e:#}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
