// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::body::Body;
use bytes::Bytes;
use http::{Request, Response, header};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use meshgate::{
    LocalOverlay,
    config::{ConfigValidator, GatewayConfig, ResolvedConfig},
    core::{Switchboard, Topology},
    ports::{NETWORK_TCP, OverlayListener, OverlayStream, OverlayTransport},
};
use tokio::net::TcpListener;

/// Answer every request on `stream` with its label, `Host` header, URI, forwarded host and body.
async fn answer(stream: impl hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static, label: String) {
    let service = service_fn(move |req: Request<Incoming>| {
        let label = label.clone();
        async move {
            let host = req
                .headers()
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .to_string();
            let forwarded_host = req
                .headers()
                .get("x-forwarded-host")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .to_string();
            let uri = req.uri().to_string();
            let body = req.into_body().collect().await.map(|b| b.to_bytes());
            let body = body.unwrap_or_default();
            let text = format!(
                "{label} {host} {uri} via={forwarded_host} body={}",
                String::from_utf8_lossy(&body)
            );
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(text))))
        }
    });
    let _ = http1::Builder::new().serve_connection(stream, service).await;
}

/// Serve a labelled echo backend on an overlay name.
pub async fn overlay_backend(overlay: &LocalOverlay, name: &str, label: &str) {
    let mut listener = overlay.bind(NETWORK_TCP, name).await.unwrap();
    let label = label.to_string();
    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            tokio::spawn(answer(TokioIo::new(stream), label.clone()));
        }
    });
}

/// Serve a labelled echo backend on a loopback TCP port.
pub async fn tcp_backend(label: &str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let label = label.to_string();
    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            tokio::spawn(answer(TokioIo::new(stream), label.clone()));
        }
    });
    addr
}

pub fn resolve(config: GatewayConfig) -> ResolvedConfig {
    ConfigValidator::resolve(&config).unwrap()
}

pub fn switchboard(config: &ResolvedConfig, overlay: Arc<LocalOverlay>) -> Arc<Switchboard> {
    let topology = Topology::from_config(config, overlay.clone()).unwrap();
    Arc::new(Switchboard::new(
        topology.routes,
        &config.system_hosts,
        &config.default_fragment,
        overlay,
    ))
}

pub fn get(host: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, host)
        .body(Body::empty())
        .unwrap()
}

pub fn post_form(host: &str, uri: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, host)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Send `req` over an overlay stream with a one-shot HTTP/1 connection.
pub async fn send_over(stream: OverlayStream, req: Request<Body>) -> Response<Body> {
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);
    let response = sender.send_request(req).await.unwrap();
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(body))
}
