//! HTTP/HTTPS server startup and lifecycle.
//!
//! Supports two modes:
//! - TLS: supplied certificate/key pairs, or one self-signed pair generated
//!   per virtual host when `auto_certificate` is set or the listen address
//!   names a conventional TLS port
//! - Plain HTTP: no certificate source configured

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use hyper_util::rt::TokioTimer;
use rustls::crypto::aws_lc_rs;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig as TlsConfig;
use rustls::SupportedCipherSuite;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::ca::{self, CaError, KeyAlgorithm};
use crate::config::{Certificate, ConfigError, ServerConfig, MAX_REQUEST_BODY_BYTES};
use crate::middleware::request_id_layer;
use crate::vhost::HostRouter;

use super::shutdown;

/// Key algorithm used for auto-generated certificates
const AUTO_CERT_ALGORITHM: KeyAlgorithm = KeyAlgorithm::Ecdsa(384);

/// Allowed cipher suites: AEAD only (AES-GCM and ChaCha20-Poly1305), under
/// ECDHE key exchange for TLS 1.2, with both RSA and ECDSA certificate
/// variants. Negotiated in server-preference order.
static TLS_CIPHER_SUITES: &[SupportedCipherSuite] = &[
    aws_lc_rs::cipher_suite::TLS13_AES_128_GCM_SHA256,
    aws_lc_rs::cipher_suite::TLS13_AES_256_GCM_SHA384,
    aws_lc_rs::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
    aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
];

/// Server lifecycle error. All variants are fatal at startup or teardown;
/// none has a steady-state recovery path.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Address(#[from] ConfigError),

    #[error(transparent)]
    CertificateGeneration(#[from] CaError),

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Failed to bind server: {0}")]
    Bind(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Graceful shutdown deadline of {0:?} exceeded")]
    ShutdownTimeout(Duration),
}

/// The composed server: a frozen host map plus lifecycle configuration.
///
/// Exposes no API beyond construction, `run`/`run_until`, and the
/// axum-server [`Handle`] for observing the bound address.
pub struct Server {
    config: ServerConfig,
    router: HostRouter,
    handle: Handle,
}

impl Server {
    pub fn new(config: ServerConfig, router: HostRouter) -> Self {
        Self {
            config,
            router,
            handle: Handle::new(),
        }
    }

    /// Handle for the underlying listener. `listening().await` reports the
    /// bound address once serving starts.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Runs until SIGINT or SIGTERM, then drains gracefully.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown::wait_for_signal()).await
    }

    /// Runs until `shutdown` resolves, then drains gracefully.
    ///
    /// The listener serves on a background task while this future blocks on
    /// `shutdown`. Once triggered, new connections are refused and in-flight
    /// requests get the full read + header + write budget to finish; the
    /// deadline elapsing is fatal.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), ServerError> {
        let addr = self.config.socket_addr()?;
        let tls = build_tls(&self.config, &self.router)?;
        let tls_enabled = tls.is_some();
        let app = build_service(self.router, &self.config);

        let handle = self.handle.clone();
        let header_read_timeout = self.config.read_header_timeout();
        let mut task = tokio::spawn(async move {
            match tls {
                Some(tls) => {
                    let mut server =
                        axum_server::bind_rustls(addr, RustlsConfig::from_config(tls));
                    apply_header_read_timeout(&mut server, header_read_timeout);
                    server
                        .handle(handle)
                        .serve(app.into_make_service())
                        .await
                }
                None => {
                    let mut server = axum_server::bind(addr);
                    apply_header_read_timeout(&mut server, header_read_timeout);
                    server
                        .handle(handle)
                        .serve(app.into_make_service())
                        .await
                }
            }
        });

        // Initialized -> Serving on successful bind
        match self.handle.listening().await {
            Some(bound) => tracing::info!(addr = %bound, tls = tls_enabled, "Server listening"),
            None => {
                let detail = match task.await {
                    Ok(Err(err)) => err.to_string(),
                    Ok(Ok(())) => "listener closed before binding".to_string(),
                    Err(join) => join.to_string(),
                };
                return Err(ServerError::Bind(detail));
            }
        }

        tokio::select! {
            result = &mut task => {
                // The listener never stops on its own while serving
                return Err(match result {
                    Ok(Ok(())) => ServerError::Server("listener stopped unexpectedly".to_string()),
                    Ok(Err(err)) => ServerError::Server(err.to_string()),
                    Err(join) => ServerError::Server(join.to_string()),
                });
            }
            _ = shutdown => {
                tracing::info!("Shutdown signal received, draining connections");
            }
        }

        // Serving -> ShuttingDown: refuse new connections, let in-flight
        // requests finish within the deadline
        let deadline = self.config.shutdown_deadline();
        self.handle.graceful_shutdown(None);
        match tokio::time::timeout(deadline, &mut task).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!("Server exiting");
                Ok(())
            }
            Ok(Ok(Err(err))) => Err(ServerError::Server(err.to_string())),
            Ok(Err(join)) => Err(ServerError::Server(join.to_string())),
            Err(_) => Err(ServerError::ShutdownTimeout(deadline)),
        }
    }
}

/// Caps how long a connection may take to deliver its request headers.
/// Enforced by the HTTP/1 state machine on every connection.
fn apply_header_read_timeout<A>(server: &mut axum_server::Server<A>, timeout: Duration) {
    server
        .http_builder()
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeout);
}

/// Wraps the dispatch service with the standard middleware stack:
/// request-ID span (outermost), compression, per-request timeout, and the
/// request body cap.
fn build_service(router: HostRouter, config: &ServerConfig) -> Router {
    router
        .into_service()
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.write_timeout(),
        ))
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn(request_id_layer))
}

/// Builds the rustls configuration, or `None` for plaintext.
fn build_tls(
    config: &ServerConfig,
    router: &HostRouter,
) -> Result<Option<Arc<TlsConfig>>, ServerError> {
    let certificates = collect_certificates(config, router)?;
    if certificates.is_empty() {
        return Ok(None);
    }

    let resolver = build_resolver(&certificates)?;

    let provider = CryptoProvider {
        cipher_suites: TLS_CIPHER_SUITES.to_vec(),
        ..aws_lc_rs::default_provider()
    };
    let mut tls = TlsConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|err| ServerError::TlsConfig(err.to_string()))?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    tls.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Some(Arc::new(tls)))
}

/// Returns the configured certificates, generating one per virtual host when
/// auto-generation is opted in or the listen address names a TLS port.
/// An empty result means plaintext.
fn collect_certificates(
    config: &ServerConfig,
    router: &HostRouter,
) -> Result<Vec<Certificate>, ServerError> {
    if !config.certificates.is_empty() {
        return Ok(config.certificates.clone());
    }
    if !config.tls_enabled() {
        return Ok(Vec::new());
    }

    let mut certificates = Vec::new();
    for host in router.host_names() {
        let generated = ca::generate(host, &[host.to_string()], AUTO_CERT_ALGORITHM)?;
        tracing::info!(host, "Generated self-signed certificate");
        certificates.push(generated);
    }
    Ok(certificates)
}

/// Parses each PEM pair and binds it to its certificate's DNS names for
/// SNI-based selection. The first pair doubles as the fallback for clients
/// that send no (or an unknown) server name.
fn build_resolver(certificates: &[Certificate]) -> Result<SniResolver, ServerError> {
    let mut resolver = SniResolver::default();
    for entry in certificates {
        let chain: Vec<CertificateDer<'static>> =
            CertificateDer::pem_slice_iter(entry.certificate.as_bytes())
                .collect::<Result<_, _>>()
                .map_err(|err| {
                    ServerError::TlsConfig(format!("failed to parse certificate PEM: {err}"))
                })?;
        if chain.is_empty() {
            return Err(ServerError::TlsConfig(
                "no CERTIFICATE block in configured PEM".to_string(),
            ));
        }
        let key = PrivateKeyDer::from_pem_slice(entry.private_key.as_bytes())
            .map_err(|err| ServerError::TlsConfig(format!("failed to parse key PEM: {err}")))?;
        let signing_key = aws_lc_rs::sign::any_supported_type(&key)
            .map_err(|err| ServerError::TlsConfig(format!("unsupported private key: {err}")))?;

        let names = certificate_names(&chain[0])?;
        if names.is_empty() {
            tracing::warn!("certificate carries no DNS names; usable only as the fallback");
        }
        let certified = Arc::new(CertifiedKey::new(chain, signing_key));
        for name in &names {
            resolver.add(name, Arc::clone(&certified));
        }
        resolver.ensure_fallback(certified);
    }
    Ok(resolver)
}

/// DNS names a certificate answers for: SubjectAltName entries, or the
/// subject CommonName when no SAN is present.
fn certificate_names(der: &CertificateDer<'_>) -> Result<Vec<String>, ServerError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
        .map_err(|err| ServerError::TlsConfig(format!("failed to parse certificate: {err}")))?;

    let mut names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for general_name in &san.value.general_names {
            if let x509_parser::extensions::GeneralName::DNSName(name) = general_name {
                names.push((*name).to_string());
            }
        }
    }
    if names.is_empty() {
        if let Some(cn) = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
        {
            names.push(cn.to_string());
        }
    }
    Ok(names)
}

/// Certificate resolver keyed by exact SNI name, with a fixed fallback for
/// clients that present no server name. Read-only once built.
#[derive(Default)]
struct SniResolver {
    by_name: HashMap<String, Arc<CertifiedKey>>,
    fallback: Option<Arc<CertifiedKey>>,
}

impl SniResolver {
    fn add(&mut self, name: &str, key: Arc<CertifiedKey>) {
        self.by_name.entry(name.to_string()).or_insert(key);
    }

    fn ensure_fallback(&mut self, key: Arc<CertifiedKey>) {
        self.fallback.get_or_insert(key);
    }

    fn lookup(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        match server_name {
            Some(name) => self
                .by_name
                .get(name)
                .cloned()
                .or_else(|| self.fallback.clone()),
            None => self.fallback.clone(),
        }
    }
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver")
            .field("names", &self.by_name.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.lookup(client_hello.server_name())
    }
}
