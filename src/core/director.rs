//! Request rewriting ahead of the upstream dial.
//!
//! A [`ProxyRequest`] tracks two distinct targets: the outgoing `Host` header and the
//! authority the transport dials. Directors rewrite one or both of them; the base rewrite
//! always runs first so affinity directors only ever override it.
use axum::body::Body;
use bytes::Bytes;
use http::{HeaderValue, Method, Request, header};
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::{
    config::{ServiceSpec, UpstreamScheme},
    core::{address::decode_session_host, forwarder::ForwardError, naming::join_skip_empty},
};

/// Largest request body buffered while looking up form fields.
pub const MAX_FORM_BODY: usize = 8 * 1024 * 1024;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// An inbound request on its way to an upstream.
pub struct ProxyRequest {
    head: http::request::Parts,
    body: Body,
    inbound_host: String,
    host: String,
    authority: String,
    form: Option<Vec<(String, String)>>,
}

impl ProxyRequest {
    pub fn new(req: Request<Body>) -> Self {
        let (head, body) = req.into_parts();
        let inbound_host = request_host(&head);
        Self {
            head,
            body,
            host: inbound_host.clone(),
            authority: inbound_host.clone(),
            inbound_host,
            form: None,
        }
    }

    /// The host the client addressed, as received.
    pub fn inbound_host(&self) -> &str {
        &self.inbound_host
    }

    /// Outgoing `Host` header.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Dial address.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// Point both the `Host` header and the dial address at `host`.
    pub fn set_target(&mut self, host: impl Into<String>) {
        let host = host.into();
        self.authority = host.clone();
        self.host = host;
    }

    /// Change only the dial address.
    pub fn set_authority(&mut self, authority: impl Into<String>) {
        self.authority = authority.into();
    }

    /// Look up a request field: urlencoded POST body first, then the query string.
    ///
    /// An empty value counts as absent. Reading the body for a `POST` buffers it, and the
    /// buffered bytes are what gets forwarded.
    pub async fn field(&mut self, name: &str) -> Result<Option<String>, ForwardError> {
        if self.head.method == Method::POST {
            self.load_form().await?;
        }

        let from_body = self
            .form
            .iter()
            .flatten()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone());
        let value = from_body.or_else(|| {
            self.head.uri.query().and_then(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.into_owned())
            })
        });

        Ok(value.filter(|value| !value.is_empty()))
    }

    async fn load_form(&mut self) -> Result<(), ForwardError> {
        if self.form.is_some() {
            return Ok(());
        }

        let is_form = self
            .head
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                value
                    .split(';')
                    .next()
                    .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_URLENCODED))
            })
            .unwrap_or(false);
        if !is_form {
            self.form = Some(Vec::new());
            return Ok(());
        }

        let body = std::mem::replace(&mut self.body, Body::empty());
        let bytes: Bytes = Limited::new(body, MAX_FORM_BODY)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    ForwardError::BodyTooLarge(MAX_FORM_BODY)
                } else {
                    ForwardError::Body(e.to_string())
                }
            })?
            .to_bytes();

        self.form = Some(
            url::form_urlencoded::parse(&bytes)
                .into_owned()
                .collect::<Vec<_>>(),
        );
        self.body = Body::from(bytes);
        Ok(())
    }

    /// Finish rewriting: apply the `Host` header and the forwarding headers.
    ///
    /// The URI is left as received; the transport picks the request-target form.
    pub fn into_request(self, client_ip: Option<String>) -> Result<Request<Body>, ForwardError> {
        let Self {
            mut head,
            body,
            inbound_host,
            host,
            ..
        } = self;

        strip_hop_headers(&mut head.headers);

        let host_value = HeaderValue::from_str(&host)
            .map_err(|_| ForwardError::InvalidTarget(host.clone()))?;
        head.headers.insert(header::HOST, host_value);

        if let Some(ip) = client_ip {
            let forwarded_for = match head
                .headers
                .get("X-Forwarded-For")
                .and_then(|value| value.to_str().ok())
            {
                Some(prior) if !prior.is_empty() => format!("{prior}, {ip}"),
                _ => ip,
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                head.headers.insert("X-Forwarded-For", value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&inbound_host) {
            head.headers.insert("X-Forwarded-Host", value);
        }
        head.headers
            .insert("X-Forwarded-Proto", HeaderValue::from_static("http"));

        Ok(Request::from_parts(head, body))
    }
}

/// The `Host` header, falling back to the URI authority.
pub fn request_host(head: &http::request::Parts) -> String {
    head.headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| head.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

const HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including those named by `Connection`.
pub fn strip_hop_headers(headers: &mut http::HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in named {
        headers.remove(name.as_str());
    }
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

/// One rewriting step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Director {
    /// Pin the dial address to the value of `field`, keeping the `Host` header.
    Sticky { field: String },
    /// Decode the session token in `field` and pin both targets to its instance.
    Session { field: String, virtual_port: u16 },
    /// Take the target from the inbound host with the gateway suffixes removed.
    HostnameForward { suffixes: Vec<String> },
}

impl Director {
    /// Build the forward director for the configured aliases.
    ///
    /// For every alias the suffix `.<fragment>.<alias>` (fragment skipped when empty) is
    /// stripped, then the same suffix followed by `:<http_port>`.
    pub fn hostname_forward(system_hosts: &[String], default_fragment: &str, http_port: u16) -> Self {
        let suffixes = system_hosts
            .iter()
            .flat_map(|alias| {
                let suffix = format!(".{}", join_skip_empty(&[default_fragment, alias]));
                let with_port = format!("{suffix}:{http_port}");
                [suffix, with_port]
            })
            .collect();
        Director::HostnameForward { suffixes }
    }

    pub async fn apply(&self, req: &mut ProxyRequest) -> Result<(), ForwardError> {
        match self {
            Director::Sticky { field } => {
                if let Some(value) = req.field(field).await? {
                    let host = req.host().to_string();
                    req.set_authority(format!("{host}:{value}"));
                }
            }
            Director::Session {
                field,
                virtual_port,
            } => {
                if let Some(token) = req.field(field).await? {
                    match decode_session_host(&token) {
                        Some(instance) => req.set_target(format!("{instance}:{virtual_port}")),
                        None => tracing::debug!(token = %token, "Ignoring malformed session token"),
                    }
                }
            }
            Director::HostnameForward { suffixes } => {
                let mut host = req.inbound_host().to_string();
                for suffix in suffixes {
                    if let Some(stripped) = host.strip_suffix(suffix.as_str()) {
                        host = stripped.to_string();
                    }
                }
                req.set_target(host);
            }
        }
        Ok(())
    }
}

/// Base rewrite plus the ordered directors of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorChain {
    upstream_host: String,
    directors: Vec<Director>,
}

impl DirectorChain {
    pub fn new(upstream_host: impl Into<String>, directors: Vec<Director>) -> Self {
        Self {
            upstream_host: upstream_host.into(),
            directors,
        }
    }

    /// Directors for `service`: sticky before session, or the forward director alone.
    pub fn for_service(
        service: &ServiceSpec,
        system_hosts: &[String],
        default_fragment: &str,
        http_port: u16,
    ) -> Self {
        let mut directors = Vec::new();
        if service.upstream.scheme == UpstreamScheme::HostnameForward {
            directors.push(Director::hostname_forward(
                system_hosts,
                default_fragment,
                http_port,
            ));
        } else {
            if let Some(field) = &service.sticky_field {
                directors.push(Director::Sticky {
                    field: field.clone(),
                });
            }
            if let Some(session) = &service.session {
                directors.push(Director::Session {
                    field: session.field.clone(),
                    virtual_port: session.virtual_port,
                });
            }
        }
        Self::new(service.upstream.host.clone(), directors)
    }

    pub fn directors(&self) -> &[Director] {
        &self.directors
    }

    pub async fn apply(&self, req: &mut ProxyRequest) -> Result<(), ForwardError> {
        req.set_target(self.upstream_host.clone());
        for director in &self.directors {
            director.apply(req).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Upstream;

    fn get(uri: &str, host: &str) -> ProxyRequest {
        ProxyRequest::new(
            Request::builder()
                .uri(uri)
                .header(header::HOST, host)
                .body(Body::empty())
                .unwrap(),
        )
    }

    fn post_form(uri: &str, host: &str, body: &str) -> ProxyRequest {
        ProxyRequest::new(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::HOST, host)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
    }

    fn aliases() -> Vec<String> {
        vec!["example.com".to_string(), "example.net".to_string()]
    }

    #[tokio::test]
    async fn test_base_rewrite_targets_upstream_host() {
        let chain = DirectorChain::new("backend:8080", vec![]);
        let mut req = get("/x", "api.example.com");
        chain.apply(&mut req).await.unwrap();
        assert_eq!(req.host(), "backend:8080");
        assert_eq!(req.authority(), "backend:8080");
        assert_eq!(req.inbound_host(), "api.example.com");
    }

    #[tokio::test]
    async fn test_sticky_changes_only_the_dial_address() {
        let chain = DirectorChain::new(
            "games",
            vec![Director::Sticky {
                field: "client_uid".to_string(),
            }],
        );
        let mut req = get("/play?client_uid=u123", "g.example.com");
        chain.apply(&mut req).await.unwrap();
        assert_eq!(req.host(), "games");
        assert_eq!(req.authority(), "games:u123");
    }

    #[tokio::test]
    async fn test_sticky_without_field_keeps_base_rewrite() {
        let chain = DirectorChain::new(
            "games",
            vec![Director::Sticky {
                field: "client_uid".to_string(),
            }],
        );
        let mut req = get("/play?client_uid=", "g.example.com");
        chain.apply(&mut req).await.unwrap();
        assert_eq!(req.authority(), "games");
    }

    #[tokio::test]
    async fn test_session_pins_both_targets() {
        let chain = DirectorChain::new(
            "games",
            vec![
                Director::Sticky {
                    field: "client_uid".to_string(),
                },
                Director::Session {
                    field: "session".to_string(),
                    virtual_port: 13337,
                },
            ],
        );
        let mut req = get(
            "/play?client_uid=u1&session=00000000-0000-002a-ffff-ffffffffffff",
            "g.example.com",
        );
        chain.apply(&mut req).await.unwrap();
        assert_eq!(req.host(), "000000000000002a:13337");
        assert_eq!(req.authority(), "000000000000002a:13337");
    }

    #[tokio::test]
    async fn test_malformed_session_token_is_ignored() {
        let director = Director::Session {
            field: "session".to_string(),
            virtual_port: 13337,
        };
        let mut req = get("/?session=garbage", "g.example.com");
        req.set_target("games");
        director.apply(&mut req).await.unwrap();
        assert_eq!(req.authority(), "games");
    }

    #[tokio::test]
    async fn test_form_body_wins_over_query_and_is_forwarded() {
        let director = Director::Sticky {
            field: "client_uid".to_string(),
        };
        let mut req = post_form("/play?client_uid=from-query", "g", "client_uid=from-body&x=1");
        director.apply(&mut req).await.unwrap();
        assert_eq!(req.authority(), "g:from-body");

        let forwarded = req.into_request(None).unwrap();
        let body = forwarded.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"client_uid=from-body&x=1");
    }

    #[tokio::test]
    async fn test_non_form_post_falls_back_to_query() {
        let mut req = ProxyRequest::new(
            Request::builder()
                .method(Method::POST)
                .uri("/?session=abc")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"session\":\"x\"}"))
                .unwrap(),
        );
        assert_eq!(req.field("session").await.unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_oversized_form_body_is_rejected() {
        let body = "a=".to_string() + &"b".repeat(MAX_FORM_BODY);
        let mut req = post_form("/", "g", &body);
        assert!(matches!(
            req.field("a").await,
            Err(ForwardError::BodyTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_hostname_forward_strips_gateway_suffixes() {
        let director = Director::hostname_forward(&aliases(), "p", 8080);
        for (inbound, expected) in [
            ("backend.internal.p.example.com", "backend.internal"),
            ("backend.internal.p.example.net:8080", "backend.internal"),
            ("elsewhere.org", "elsewhere.org"),
        ] {
            let mut req = get("/", inbound);
            director.apply(&mut req).await.unwrap();
            assert_eq!(req.host(), expected, "inbound {inbound}");
            assert_eq!(req.authority(), expected, "inbound {inbound}");
        }
    }

    #[tokio::test]
    async fn test_hostname_forward_without_fragment() {
        let director = Director::hostname_forward(&aliases(), "", 8080);
        let mut req = get("/", "svc.example.com");
        director.apply(&mut req).await.unwrap();
        assert_eq!(req.host(), "svc");
    }

    #[tokio::test]
    async fn test_hostname_forward_reads_inbound_host_after_base_rewrite() {
        let service = ServiceSpec::new("p", Upstream::parse("p", "forward://").unwrap(), &["p"]);
        let chain = DirectorChain::for_service(&service, &aliases(), "p", 8080);
        let mut req = get("/", "db.p.example.com");
        chain.apply(&mut req).await.unwrap();
        assert_eq!(req.authority(), "db");
    }

    #[test]
    fn test_chain_order_is_sticky_then_session() {
        let service = ServiceSpec::new(
            "games",
            Upstream::parse("games", "hotcore://games").unwrap(),
            &["g"],
        )
        .with_session("session", 13337)
        .with_sticky_field("client_uid");
        let chain = DirectorChain::for_service(&service, &aliases(), "", 8080);
        assert!(matches!(chain.directors()[0], Director::Sticky { .. }));
        assert!(matches!(chain.directors()[1], Director::Session { .. }));
    }

    #[test]
    fn test_into_request_sets_forwarding_headers() {
        let mut req = ProxyRequest::new(
            Request::builder()
                .uri("/path")
                .header(header::HOST, "api.example.com")
                .header(header::CONNECTION, "keep-alive, x-private")
                .header("x-private", "1")
                .header("X-Forwarded-For", "10.0.0.1")
                .body(Body::empty())
                .unwrap(),
        );
        req.set_target("backend");
        let out = req.into_request(Some("192.168.1.7".to_string())).unwrap();
        let headers = out.headers();
        assert_eq!(headers[header::HOST], "backend");
        assert_eq!(headers["X-Forwarded-Host"], "api.example.com");
        assert_eq!(headers["X-Forwarded-For"], "10.0.0.1, 192.168.1.7");
        assert_eq!(headers["X-Forwarded-Proto"], "http");
        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key("x-private"));
    }
}
