//! Dial strategies for upstream requests.
use std::{error::Error as StdError, io, sync::Arc, time::Duration};

use axum::body::Body;
use http::{HeaderValue, Request, Response, Uri, header};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioIo},
};

use crate::{
    config::UpstreamScheme,
    core::forwarder::ForwardError,
    ports::overlay::{NETWORK_REGISTRY, NETWORK_TCP, OverlayTransport},
};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// How a service reaches its upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain TCP with pooled keep-alive connections.
    Direct,
    /// Overlay primary dial.
    Overlay,
    /// Overlay registry-aware dial.
    OverlayRegistry,
    /// Overlay primary dial for hostname pass-through.
    Forward,
}

impl TransportKind {
    pub fn for_scheme(scheme: UpstreamScheme) -> Self {
        match scheme {
            UpstreamScheme::PlainHttp => TransportKind::Direct,
            UpstreamScheme::Overlay => TransportKind::Overlay,
            UpstreamScheme::OverlayRegistry => TransportKind::OverlayRegistry,
            UpstreamScheme::HostnameForward => TransportKind::Forward,
        }
    }

    /// Overlay network used for dialing, `None` for direct TCP.
    pub fn network(&self) -> Option<&'static str> {
        match self {
            TransportKind::Direct => None,
            TransportKind::Overlay | TransportKind::Forward => Some(NETWORK_TCP),
            TransportKind::OverlayRegistry => Some(NETWORK_REGISTRY),
        }
    }

    /// Only direct connections are reused across requests.
    pub fn keep_alive(&self) -> bool {
        matches!(self, TransportKind::Direct)
    }
}

/// Overlay dial target for an authority: a trailing `:80` is dropped, anything else is kept.
///
/// The part after the last colon is not required to be numeric; registry-aware dialing
/// resolves `name:key` pairs produced by sticky routing.
pub fn overlay_target(authority: &str) -> Result<String, ForwardError> {
    let invalid = || ForwardError::InvalidTarget(authority.to_string());
    if authority.is_empty()
        || authority.contains(|c: char| c.is_whitespace() || c == '/' || c == '@')
    {
        return Err(invalid());
    }
    match authority.rsplit_once(':') {
        Some(("", _)) => Err(invalid()),
        Some((host, "80")) => Ok(host.to_string()),
        _ => Ok(authority.to_string()),
    }
}

pub struct Transport {
    kind: TransportKind,
    dial_timeout: Duration,
    overlay: Arc<dyn OverlayTransport>,
    client: Option<Client<HttpConnector, Body>>,
}

impl Transport {
    pub fn new(kind: TransportKind, dial_timeout: Duration, overlay: Arc<dyn OverlayTransport>) -> Self {
        let client = kind.keep_alive().then(|| {
            let mut connector = HttpConnector::new();
            connector.set_connect_timeout(Some(dial_timeout));
            connector.set_nodelay(true);
            Client::builder(TokioExecutor::new())
                .pool_idle_timeout(POOL_IDLE_TIMEOUT)
                .build::<_, Body>(connector)
        });
        Self {
            kind,
            dial_timeout,
            overlay,
            client,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Send `req` to `authority`, choosing the request-target form the transport needs.
    pub async fn send(
        &self,
        mut req: Request<Body>,
        authority: &str,
    ) -> Result<Response<Incoming>, ForwardError> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();

        match (&self.client, self.kind.network()) {
            (Some(client), _) => {
                *req.uri_mut() = format!("http://{authority}{path_and_query}")
                    .parse::<Uri>()
                    .map_err(|_| ForwardError::InvalidTarget(authority.to_string()))?;
                client.request(req).await.map_err(|e| {
                    if is_timeout(&e) {
                        ForwardError::DialTimeout {
                            target: authority.to_string(),
                            timeout: self.dial_timeout,
                        }
                    } else if e.is_connect() {
                        ForwardError::Dial {
                            target: authority.to_string(),
                            source: io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()),
                        }
                    } else {
                        ForwardError::Upstream {
                            target: authority.to_string(),
                            message: e.to_string(),
                        }
                    }
                })
            }
            (None, Some(network)) => {
                let target = overlay_target(authority)?;
                *req.uri_mut() = path_and_query
                    .parse::<Uri>()
                    .map_err(|_| ForwardError::InvalidTarget(authority.to_string()))?;
                req.headers_mut()
                    .insert(header::CONNECTION, HeaderValue::from_static("close"));

                let stream = self
                    .overlay
                    .dial_timeout(network, &target, self.dial_timeout)
                    .await
                    .map_err(|e| match e.kind() {
                        io::ErrorKind::TimedOut => ForwardError::DialTimeout {
                            target: target.clone(),
                            timeout: self.dial_timeout,
                        },
                        _ => ForwardError::Dial {
                            target: target.clone(),
                            source: e,
                        },
                    })?;

                let (mut sender, conn) =
                    hyper::client::conn::http1::handshake(TokioIo::new(stream))
                        .await
                        .map_err(|e| ForwardError::Upstream {
                            target: target.clone(),
                            message: e.to_string(),
                        })?;
                tokio::spawn(async move {
                    if let Err(err) = conn.await {
                        tracing::debug!("Overlay connection closed with error: {err}");
                    }
                });

                sender
                    .send_request(req)
                    .await
                    .map_err(|e| ForwardError::Upstream {
                        target,
                        message: e.to_string(),
                    })
            }
            (None, None) => Err(ForwardError::InvalidTarget(authority.to_string())),
        }
    }
}

fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = current.source();
    }
    false
}
