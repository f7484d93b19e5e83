//! Virtual-host dispatch.
//!
//! `HostRouter` is a read-only mapping from host name to an inner
//! `axum::Router`, frozen before the server starts. Dispatch first answers
//! three fixed well-known paths host-independently, then resolves the
//! effective host from a strict header precedence, strips any `:port`
//! suffix, and forwards to the matching entry (falling back to the
//! `"default"` entry, then 403). The map is never mutated while serving, so
//! concurrent dispatch needs no locking.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower::ServiceExt;

use crate::config::DEFAULT_HOST_KEY;

/// Fallback host when no host-identifying signal is present
const FALLBACK_HOST: &str = "localhost";

/// Host headers tried before the connection host, in precedence order
const HOST_HEADERS: [&str; 2] = ["X-Forwarded-Host", "X-Host"];

const CROSSDOMAIN_BODY: &str = r#"<?xml version="1.0"?><cross-domain-policy></cross-domain-policy>"#;
const ROBOTS_BODY: &str = "Disallow: /";

/// Static mapping from virtual-host name to request handler.
///
/// Keys are case-sensitive and unique; the literal key `"default"` is the
/// catch-all for unmatched hosts.
#[derive(Default)]
pub struct HostRouter {
    hosts: HashMap<String, Router>,
}

impl HostRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a host name, replacing any previous entry.
    pub fn host(mut self, name: impl Into<String>, router: Router) -> Self {
        self.hosts.insert(name.into(), router);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Host keys in the mapping, in unspecified order.
    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    /// Freezes the mapping into the dispatching service.
    pub fn into_service(self) -> Router {
        let hosts = Arc::new(self.hosts);
        Router::new().fallback(move |request: Request| {
            let hosts = Arc::clone(&hosts);
            async move { dispatch(hosts, request).await }
        })
    }
}

impl std::fmt::Debug for HostRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRouter")
            .field("hosts", &self.hosts.keys().collect::<Vec<_>>())
            .finish()
    }
}

async fn dispatch(hosts: Arc<HashMap<String, Router>>, request: Request) -> Response {
    if let Some(response) = well_known_response(request.uri().path()) {
        return response;
    }

    let host = strip_port(&resolve_host(&request)).to_string();

    match hosts.get(&host).or_else(|| hosts.get(DEFAULT_HOST_KEY)) {
        Some(inner) => match inner.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        },
        None => forbidden(),
    }
}

/// Fixed responses served unconditionally, before host resolution.
fn well_known_response(path: &str) -> Option<Response> {
    let (content_type, body) = match path {
        "/favicon.ico" => ("image/x-icon", ""),
        "/robots.txt" => ("text/plain; charset=utf-8", ROBOTS_BODY),
        "/crossdomain.xml" => ("application/xml; charset=utf-8", CROSSDOMAIN_BODY),
        _ => return None,
    };
    Some(
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            Body::from(body),
        )
            .into_response(),
    )
}

/// Resolves the effective host: `X-Forwarded-Host`, then `X-Host`, then the
/// `Host` header, then the request-URI authority, then `"localhost"`. The
/// first non-empty value wins.
fn resolve_host(request: &Request) -> String {
    for name in HOST_HEADERS {
        if let Some(value) = request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
        {
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    if let Some(value) = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
    {
        if !value.is_empty() {
            return value.to_string();
        }
    }
    if let Some(host) = request.uri().host() {
        if !host.is_empty() {
            return host.to_string();
        }
    }
    FALLBACK_HOST.to_string()
}

/// Strips a trailing `:port` suffix, matching on the last colon.
fn strip_port(host: &str) -> &str {
    match host.rfind(':') {
        Some(index) => &host[..index],
        None => host,
    }
}

fn forbidden() -> Response {
    let status = StatusCode::FORBIDDEN;
    (
        status,
        status.canonical_reason().unwrap_or_default().to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn named_app(name: &'static str) -> Router {
        Router::new().fallback(move || async move { name })
    }

    fn request(path: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn dispatch_to(service: &Router, request: Request) -> Response {
        service.clone().oneshot(request).await.unwrap()
    }

    fn two_host_service() -> Router {
        HostRouter::new()
            .host("a", named_app("handler-a"))
            .host("b", named_app("handler-b"))
            .into_service()
    }

    #[tokio::test]
    async fn forwarded_host_header_takes_precedence() {
        let service = two_host_service();
        let response = dispatch_to(
            &service,
            request("/", &[("X-Forwarded-Host", "a"), ("X-Host", "b"), ("Host", "c")]),
        )
        .await;
        assert_eq!(body_text(response).await, "handler-a");
    }

    #[tokio::test]
    async fn x_host_header_beats_host_header() {
        let service = two_host_service();
        let response =
            dispatch_to(&service, request("/", &[("X-Host", "b"), ("Host", "c")])).await;
        assert_eq!(body_text(response).await, "handler-b");
    }

    #[tokio::test]
    async fn bare_request_resolves_to_localhost() {
        let service = HostRouter::new()
            .host("localhost", named_app("local"))
            .into_service();
        let response = dispatch_to(&service, request("/", &[])).await;
        assert_eq!(body_text(response).await, "local");
    }

    #[tokio::test]
    async fn port_suffix_is_stripped_for_lookup() {
        let service = HostRouter::new()
            .host("example.com", named_app("example"))
            .into_service();
        let response =
            dispatch_to(&service, request("/", &[("Host", "example.com:8443")])).await;
        assert_eq!(body_text(response).await, "example");
    }

    #[tokio::test]
    async fn unmatched_host_falls_back_to_default_entry() {
        let service = HostRouter::new()
            .host("a", named_app("handler-a"))
            .host("default", named_app("catch-all"))
            .into_service();
        let response = dispatch_to(&service, request("/", &[("Host", "unknown")])).await;
        assert_eq!(body_text(response).await, "catch-all");
    }

    #[tokio::test]
    async fn unmatched_host_without_default_is_forbidden() {
        let service = two_host_service();
        let response = dispatch_to(&service, request("/", &[("Host", "unknown")])).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await, "Forbidden");
    }

    #[tokio::test]
    async fn well_known_paths_ignore_host_resolution() {
        // No entry matches "unknown" and there is no default, yet the
        // well-known paths still answer.
        let service = two_host_service();

        let response =
            dispatch_to(&service, request("/favicon.ico", &[("Host", "unknown")])).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "image/x-icon"
        );
        assert_eq!(body_text(response).await, "");

        let response =
            dispatch_to(&service, request("/robots.txt", &[("Host", "unknown")])).await;
        assert_eq!(
            response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "Disallow: /");

        let response =
            dispatch_to(&service, request("/crossdomain.xml", &[("Host", "unknown")])).await;
        assert_eq!(
            response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "application/xml; charset=utf-8"
        );
        assert_eq!(
            body_text(response).await,
            r#"<?xml version="1.0"?><cross-domain-policy></cross-domain-policy>"#
        );
    }

    #[test]
    fn strip_port_matches_last_colon() {
        assert_eq!(strip_port("example.com:8443"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port(""), "");
    }

    #[test]
    fn host_lookup_is_case_sensitive() {
        let router = HostRouter::new().host("Example.com", named_app("x"));
        let names: Vec<&str> = router.host_names().collect();
        assert_eq!(names, vec!["Example.com"]);
    }
}
