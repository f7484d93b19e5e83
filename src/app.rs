//! Demo per-host application served by the binary.
//!
//! Each configured virtual host gets a small status app: a greeting on every
//! path and a liveness probe at `/healthz`. Real deployments supply their own
//! routers to [`HostRouter`](crate::vhost::HostRouter).

use axum::routing::get;
use axum::Router;

use crate::config::VhostConfig;

/// Builds the status application for one virtual host.
pub fn vhost_app(vhost: &VhostConfig) -> Router {
    let greeting = vhost
        .message
        .clone()
        .unwrap_or_else(|| format!("Served by {}", vhost.name));

    Router::new().route("/healthz", get(health)).fallback(move || {
        let greeting = greeting.clone();
        async move { greeting }
    })
}

/// Health check handler.
///
/// Returns a simple "ok" response to indicate the service is running.
/// This is a liveness probe - it only checks that the process can respond to HTTP.
async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_body(app: Router, path: &str) -> String {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn greeting_defaults_to_host_name() {
        let app = vhost_app(&VhostConfig {
            name: "example.com".to_string(),
            message: None,
        });
        assert_eq!(get_body(app, "/anything").await, "Served by example.com");
    }

    #[tokio::test]
    async fn configured_message_and_health_probe() {
        let vhost = VhostConfig {
            name: "example.com".to_string(),
            message: Some("hello".to_string()),
        };
        assert_eq!(get_body(vhost_app(&vhost), "/").await, "hello");
        assert_eq!(get_body(vhost_app(&vhost), "/healthz").await, "ok");
    }
}
