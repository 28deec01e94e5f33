//! Per-service reverse-proxy handlers and the factory that builds them.
use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::ConnectInfo,
    response::{IntoResponse, Response},
};
use http::{Request, StatusCode};
use thiserror::Error;
use tracing::Instrument;

use crate::{
    config::{ConfigError, ResolvedConfig, ServiceSpec, Upstream, UpstreamScheme},
    core::{
        director::{Director, DirectorChain, ProxyRequest, strip_hop_headers},
        transport::{Transport, TransportKind},
    },
    ports::overlay::OverlayTransport,
};

/// Per-request forwarding failures. None of these are fatal to the gateway.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ForwardError {
    #[error("Dial to {target} failed: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Dial to {target} timed out after {timeout:?}")]
    DialTimeout { target: String, timeout: Duration },

    #[error("Upstream request to {target} failed: {message}")]
    Upstream { target: String, message: String },

    #[error("Invalid upstream target '{0}'")]
    InvalidTarget(String),

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::DialTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::Body(_) => StatusCode::BAD_REQUEST,
            ForwardError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ForwardError::Dial { .. }
            | ForwardError::Upstream { .. }
            | ForwardError::InvalidTarget(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = status.canonical_reason().unwrap_or("Bad Gateway");
        (status, message).into_response()
    }
}

/// Reverse-proxy handler for one service.
pub struct Forwarder {
    service: String,
    upstream: Upstream,
    chain: DirectorChain,
    transport: Transport,
}

impl Forwarder {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    pub fn directors(&self) -> &[Director] {
        self.chain.directors()
    }

    pub fn transport(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn dial_timeout(&self) -> Duration {
        self.transport.dial_timeout()
    }

    /// Proxy `req` upstream and stream the response back.
    pub async fn forward(&self, req: Request<Body>) -> Result<Response, ForwardError> {
        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        let mut proxied = ProxyRequest::new(req);
        self.chain.apply(&mut proxied).await?;

        let authority = proxied.authority().to_string();
        tracing::Span::current().record("upstream", authority.as_str());
        tracing::debug!(
            method = %proxied.method(),
            host = %proxied.host(),
            "Forwarding request"
        );

        let outgoing = proxied.into_request(client_ip)?;
        let response = self.transport.send(outgoing, &authority).await?;

        let (mut parts, body) = response.into_parts();
        strip_hop_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }

    /// [`Forwarder::forward`] with failures rendered as error responses.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        let host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        let span = tracing::info_span!(
            "forward",
            service = %self.service,
            host = %host,
            upstream = tracing::field::Empty,
        );

        async move {
            match self.forward(req).await {
                Ok(response) => response,
                Err(err) => {
                    match err.status() {
                        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
                            tracing::warn!("Rejected request: {err}")
                        }
                        _ => tracing::error!("Backend request failed: {err}"),
                    }
                    err.into_response()
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Builds one [`Forwarder`] per service from shared gateway settings.
#[derive(Clone)]
pub struct ForwarderFactory {
    overlay: Arc<dyn OverlayTransport>,
    system_hosts: Vec<String>,
    default_fragment: String,
    http_port: u16,
}

impl ForwarderFactory {
    pub fn new(
        overlay: Arc<dyn OverlayTransport>,
        system_hosts: Vec<String>,
        default_fragment: impl Into<String>,
        http_port: u16,
    ) -> Self {
        Self {
            overlay,
            system_hosts,
            default_fragment: default_fragment.into(),
            http_port,
        }
    }

    pub fn from_config(overlay: Arc<dyn OverlayTransport>, config: &ResolvedConfig) -> Self {
        Self::new(
            overlay,
            config.system_hosts.clone(),
            config.default_fragment.clone(),
            config.http_port,
        )
    }

    pub fn system_hosts(&self) -> &[String] {
        &self.system_hosts
    }

    pub fn default_fragment(&self) -> &str {
        &self.default_fragment
    }

    pub fn build(&self, service: &ServiceSpec) -> Result<Forwarder, ConfigError> {
        let scheme = service.upstream.scheme;
        if scheme == UpstreamScheme::HostnameForward {
            if service.session.is_some() || service.sticky_field.is_some() {
                return Err(ConfigError::ConflictingDirectors {
                    service: service.name.clone(),
                });
            }
        } else if service.upstream.host.is_empty() {
            return Err(ConfigError::MissingUpstream {
                service: service.name.clone(),
            });
        }

        let chain = DirectorChain::for_service(
            service,
            &self.system_hosts,
            &self.default_fragment,
            self.http_port,
        );
        let transport = Transport::new(
            TransportKind::for_scheme(scheme),
            service.dial_timeout,
            self.overlay.clone(),
        );

        tracing::debug!(
            service = %service.name,
            upstream = %service.upstream,
            directors = chain.directors().len(),
            "Built forwarder"
        );

        Ok(Forwarder {
            service: service.name.clone(),
            upstream: service.upstream.clone(),
            chain,
            transport,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::local_overlay::LocalOverlay,
        ports::overlay::{OverlayListener, OverlayStream},
    };

    fn factory() -> ForwarderFactory {
        ForwarderFactory::new(
            Arc::new(LocalOverlay::new()),
            vec!["example.com".to_string()],
            "p",
            8080,
        )
    }

    /// Overlay whose dials never complete.
    struct StalledOverlay;

    #[async_trait::async_trait]
    impl OverlayTransport for StalledOverlay {
        async fn dial(&self, _network: &str, _target: &str) -> io::Result<OverlayStream> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        }

        async fn bind(
            &self,
            _network: &str,
            _name: &str,
        ) -> io::Result<Box<dyn OverlayListener>> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }

        async fn listen_and_serve(&self, _network: &str, _address: &str) -> io::Result<()> {
            Ok(())
        }

        async fn services(&self) -> Vec<String> {
            Vec::new()
        }

        async fn routes(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn spec(name: &str, upstream: &str) -> ServiceSpec {
        ServiceSpec::new(name, Upstream::parse(name, upstream).unwrap(), &[name])
    }

    #[test]
    fn test_error_statuses() {
        let dial = ForwardError::Dial {
            target: "x".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(dial.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ForwardError::DialTimeout {
                target: "x".to_string(),
                timeout: Duration::from_secs(1)
            }
            .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ForwardError::BodyTooLarge(1).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ForwardError::Body("eof".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_build_selects_transport_and_directors() {
        let factory = factory();

        let direct = factory.build(&spec("legacy", "http://127.0.0.1:9000")).unwrap();
        assert_eq!(direct.transport(), TransportKind::Direct);
        assert!(direct.directors().is_empty());

        let registry = factory
            .build(
                &spec("games", "hotcore://games")
                    .with_sticky_field("client_uid")
                    .with_session("session", 13337),
            )
            .unwrap();
        assert_eq!(registry.transport(), TransportKind::OverlayRegistry);
        assert_eq!(registry.directors().len(), 2);

        let forward = factory.build(&spec("p", "forward://")).unwrap();
        assert_eq!(forward.transport(), TransportKind::Forward);
        assert!(matches!(
            forward.directors(),
            [Director::HostnameForward { .. }]
        ));
    }

    #[tokio::test]
    async fn test_build_rejects_forward_with_affinity() {
        let err = factory()
            .build(&spec("p", "forward://").with_sticky_field("uid"))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::ConflictingDirectors { .. }));
    }

    #[tokio::test]
    async fn test_unbound_overlay_target_is_bad_gateway() {
        let forwarder = factory().build(&spec("api", "overlay://nowhere")).unwrap();
        let response = forwarder
            .handle(
                Request::builder()
                    .uri("/")
                    .header(http::header::HOST, "api.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_direct_dial_failure_is_bad_gateway() {
        // Port 1 on loopback refuses connections.
        let forwarder = factory()
            .build(&spec("legacy", "http://127.0.0.1:1"))
            .unwrap();
        let response = forwarder
            .handle(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_slow_overlay_dial_times_out_with_gateway_timeout() {
        let factory = ForwarderFactory::new(
            Arc::new(StalledOverlay),
            vec!["example.com".to_string()],
            "",
            8080,
        );
        let forwarder = factory
            .build(&spec("api", "overlay://stalled").with_dial_timeout(Duration::from_millis(100)))
            .unwrap();

        let started = std::time::Instant::now();
        let response = forwarder
            .handle(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
