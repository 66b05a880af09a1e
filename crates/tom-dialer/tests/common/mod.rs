//! Shared fixtures: a mock relay ingress (TLS + binding exchange) and a
//! mock endpoint directory (HTTP).

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tom_dialer::tom_binding::{self, ConnectRequest, ConnectResponse};
use tom_dialer::{BoxedStream, ContextDialer, Identity};
use webpki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, UnixTime};

pub const API_KEY: &str = "test-key";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

/// Self-signed client identity; key and certificate match.
pub fn client_identity(registration_id: &str) -> Identity {
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["client.test".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    Identity::new(key.serialize_pem(), cert.pem(), registration_id)
}

// ── Mock relay ──────────────────────────────────────────────────────

pub struct MockRelay {
    pub addr: SocketAddr,
    pub server_cert: CertificateDer<'static>,
    /// Every binding request received, in order.
    pub requests: Arc<Mutex<Vec<ConnectRequest>>>,
    /// Handshakes where the client presented a certificate.
    pub client_certs_seen: Arc<AtomicUsize>,
}

impl MockRelay {
    pub fn ingress(&self) -> String {
        self.addr.to_string()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Relay that answers each binding request with `respond`, then echoes
/// application bytes on accepted bindings.
pub async fn spawn_relay<F>(respond: F) -> MockRelay
where
    F: Fn(&ConnectRequest) -> ConnectResponse + Send + Sync + 'static,
{
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    let server_cert = cert.der().clone();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(Arc::new(AnyClientCert(provider)))
        .with_single_cert(
            vec![server_cert.clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        )
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let client_certs_seen = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);

    {
        let requests = requests.clone();
        let client_certs_seen = client_certs_seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((sock, _)) = listener.accept().await else { break };
                let acceptor = acceptor.clone();
                let requests = requests.clone();
                let client_certs_seen = client_certs_seen.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(sock).await else { return };
                    if tls.get_ref().1.peer_certificates().is_some() {
                        client_certs_seen.fetch_add(1, Ordering::SeqCst);
                    }
                    let Ok(req) = tom_binding::read_request(&mut tls).await else { return };
                    requests.lock().unwrap().push(req.clone());
                    let resp = respond(&req);
                    let accepted = !resp.is_rejected();
                    if tom_binding::write_response(&mut tls, &resp).await.is_err() {
                        return;
                    }
                    if accepted {
                        let (mut r, mut w) = tokio::io::split(tls);
                        let _ = tokio::io::copy(&mut r, &mut w).await;
                    }
                });
            }
        });
    }

    MockRelay {
        addr,
        server_cert,
        requests,
        client_certs_seen,
    }
}

/// Requests a client certificate but accepts any.
#[derive(Debug)]
struct AnyClientCert(Arc<CryptoProvider>);

impl ClientCertVerifier for AnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// ── Mock directory ──────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockDirectory {
    /// Served from `/registrations/:id/bound_endpoints`.
    pub bound: Arc<Mutex<Vec<Value>>>,
    /// Served from `/endpoints`. `None` makes that route fail with 500.
    pub all: Arc<Mutex<Option<Vec<Value>>>>,
    /// Non-zero overrides the bound_endpoints status.
    pub bound_status: Arc<Mutex<u16>>,
    /// Delay before answering bound_endpoints.
    pub bound_delay: Arc<Mutex<Duration>>,
    /// Certificate PEM returned by registration; empty omits it.
    pub issued_cert: Arc<Mutex<String>>,
    pub registrations: Arc<Mutex<Vec<Value>>>,
    pub bound_calls: Arc<AtomicUsize>,
    pub registered_ids: Arc<Mutex<Vec<String>>>,
}

pub fn endpoint_json(id: &str, url: &str) -> Value {
    json!({ "id": id, "url": url, "bindings": ["kubernetes"] })
}

impl MockDirectory {
    /// Publish the same endpoints on both routes.
    pub fn set_endpoints(&self, endpoints: Vec<Value>) {
        *self.bound.lock().unwrap() = endpoints.clone();
        *self.all.lock().unwrap() = Some(endpoints);
    }

    pub fn bound_calls(&self) -> usize {
        self.bound_calls.load(Ordering::SeqCst)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    /// Serve on an ephemeral port; returns the base URL.
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/registrations", post(register))
            .route("/registrations/:id/bound_endpoints", get(bound_endpoints))
            .route("/endpoints", get(all_endpoints))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let version = headers
        .get("ngrok-version")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    auth == format!("Bearer {API_KEY}") && version == "2"
}

async fn register(
    State(dir): State<MockDirectory>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }
    dir.registrations.lock().unwrap().push(body);
    let n = dir.registration_count();
    let id = format!("reg_{n}");
    dir.registered_ids.lock().unwrap().push(id.clone());

    let cert = dir.issued_cert.lock().unwrap().clone();
    let resp = if cert.is_empty() {
        json!({ "id": id })
    } else {
        json!({
            "id": id,
            "binding": {
                "cert": { "cert": cert, "not_before": "2026-01-01T00:00:00Z", "not_after": "2027-01-01T00:00:00Z" },
                "ingress_endpoint": "ingress.test:443"
            }
        })
    };
    (StatusCode::CREATED, Json(resp)).into_response()
}

async fn bound_endpoints(
    State(dir): State<MockDirectory>,
    Path(_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    dir.bound_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *dir.bound_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }
    let status = *dir.bound_status.lock().unwrap();
    if status != 0 {
        let code = StatusCode::from_u16(status).unwrap();
        return (code, "directory unavailable").into_response();
    }
    let endpoints = dir.bound.lock().unwrap().clone();
    Json(json!({ "endpoints": endpoints })).into_response()
}

async fn all_endpoints(State(dir): State<MockDirectory>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }
    match dir.all.lock().unwrap().clone() {
        Some(endpoints) => Json(json!({ "endpoints": endpoints })).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
    }
}

// ── Test dialers ────────────────────────────────────────────────────

/// Records every dial and hands back one end of an in-memory pipe.
#[derive(Default)]
pub struct RecordingDialer {
    pub calls: Mutex<Vec<(String, String)>>,
}

impl RecordingDialer {
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContextDialer for RecordingDialer {
    async fn dial_context(
        &self,
        _cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<BoxedStream> {
        self.calls
            .lock()
            .unwrap()
            .push((network.to_string(), address.to_string()));
        let (near, _far) = tokio::io::duplex(64);
        Ok(Box::new(near))
    }
}

/// Always fails, counting attempts.
#[derive(Default)]
pub struct FailingDialer {
    pub attempts: AtomicUsize,
}

impl FailingDialer {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextDialer for FailingDialer {
    async fn dial_context(
        &self,
        _cancel: &CancellationToken,
        _network: &str,
        address: &str,
    ) -> io::Result<BoxedStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("refused: {address}"),
        ))
    }
}
