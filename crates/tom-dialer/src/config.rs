use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use webpki_types::pem::PemObject;
use webpki_types::CertificateDer;

use crate::connection::{ContextDialer, TcpDialer};
use crate::identity::Identity;
use crate::retry::RetryPolicy;
use crate::store::{FileStore, IdentityStore};
use crate::TomDialerError;

pub const DEFAULT_API_URL: &str = "https://api.ngrok.com";
pub const DEFAULT_INGRESS_ENDPOINT: &str = "kubernetes-binding-ingress.ngrok.io:443";
pub const DEFAULT_BINDING_KIND: &str = "kubernetes";

/// Environment variable read by [`DialerConfig::new`] for the directory API key.
pub const API_KEY_ENV: &str = "TOM_DIALER_API_KEY";

/// Configuration for a [`Dialer`](crate::Dialer).
///
/// Everything has a default. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use tom_dialer::{DialerConfig, RetryPolicy};
///
/// let config = DialerConfig::new()
///     .api_key("key_123")
///     .refresh_interval(Duration::from_secs(60))
///     .retry_policy(RetryPolicy::default().max_retries(5));
/// ```
#[derive(Clone)]
pub struct DialerConfig {
    /// Directory API key. Enables provisioning and discovery.
    pub(crate) api_key: Option<String>,
    pub(crate) api_url: String,
    pub(crate) api_timeout: Duration,
    /// Explicit identity; skips the store and provisioning entirely.
    pub(crate) identity: Option<Identity>,
    pub(crate) store: Arc<dyn IdentityStore>,
    pub(crate) force_provision: bool,
    pub(crate) endpoint_selectors: Vec<String>,
    /// Binding kind used when cross-checking the bound endpoint list.
    pub(crate) binding_kind: String,
    pub(crate) ingress_endpoint: String,
    /// Trust roots for the ingress certificate. `None` skips verification.
    pub(crate) root_certs: Option<Vec<CertificateDer<'static>>>,
    pub(crate) ingress_dialer: Arc<dyn ContextDialer>,
    pub(crate) fallback_dialer: Option<Arc<dyn ContextDialer>>,
    /// Zero disables the background refresh.
    pub(crate) refresh_interval: Duration,
    pub(crate) discover_on_miss: bool,
    pub(crate) retry: RetryPolicy,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DialerConfig {
    /// Create a config with defaults.
    ///
    /// If `TOM_DIALER_API_KEY` is set it becomes the API key. This can be
    /// overridden with [`.api_key()`](Self::api_key).
    pub fn new() -> Self {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty());

        Self {
            api_key,
            api_url: DEFAULT_API_URL.to_string(),
            api_timeout: Duration::from_secs(30),
            identity: None,
            store: Arc::new(FileStore::new(FileStore::default_dir())),
            force_provision: false,
            endpoint_selectors: vec!["true".to_string()],
            binding_kind: DEFAULT_BINDING_KIND.to_string(),
            ingress_endpoint: DEFAULT_INGRESS_ENDPOINT.to_string(),
            root_certs: None,
            ingress_dialer: Arc::new(TcpDialer::new()),
            fallback_dialer: None,
            refresh_interval: Duration::from_secs(30),
            discover_on_miss: false,
            retry: RetryPolicy::default(),
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Drop any API key, including one picked up from the environment.
    pub fn without_api_key(mut self) -> Self {
        self.api_key = None;
        self
    }

    /// Directory base URL (default: `https://api.ngrok.com`).
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Per-request timeout for directory calls (default: 30 s).
    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Where identities are loaded from and saved to (default: a
    /// [`FileStore`] at `~/.tom-dialer/certs`).
    pub fn store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.store = store;
        self
    }

    /// Provision a new identity even if the store holds a usable one.
    pub fn force_provision(mut self, force: bool) -> Self {
        self.force_provision = force;
        self
    }

    /// Selectors sent with registration (default: `["true"]`).
    pub fn endpoint_selectors(mut self, selectors: Vec<String>) -> Self {
        self.endpoint_selectors = selectors;
        self
    }

    pub fn binding_kind(mut self, kind: impl Into<String>) -> Self {
        self.binding_kind = kind.into();
        self
    }

    /// Relay ingress as `host:port`.
    pub fn ingress_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.ingress_endpoint = endpoint.into();
        self
    }

    pub fn root_certs(mut self, certs: Vec<CertificateDer<'static>>) -> Self {
        self.root_certs = Some(certs);
        self
    }

    /// Parse trust roots from PEM.
    pub fn root_certs_pem(self, pem: &[u8]) -> Result<Self, TomDialerError> {
        let certs = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TomDialerError::Config(format!("invalid root certificate PEM: {e}")))?;
        Ok(self.root_certs(certs))
    }

    /// Dialer used for the TCP leg to the ingress (default: [`TcpDialer`]).
    pub fn ingress_dialer(mut self, dialer: Arc<dyn ContextDialer>) -> Self {
        self.ingress_dialer = dialer;
        self
    }

    /// Dialer for addresses that are not bound endpoints. Without one,
    /// such dials fail with `EndpointNotFound`.
    pub fn fallback_dialer(mut self, dialer: Arc<dyn ContextDialer>) -> Self {
        self.fallback_dialer = Some(dialer);
        self
    }

    /// Background refresh period (default: 30 s). Zero disables it.
    pub fn refresh_interval(mut self, every: Duration) -> Self {
        self.refresh_interval = every;
        self
    }

    /// Run discovery once when a hostname is missing from the cache.
    ///
    /// Each miss costs a full directory round trip (bound listing plus the
    /// binding cross-check), so with a fallback dialer every non-bound
    /// dial pays it. Concurrent misses share one discovery.
    pub fn discover_on_miss(mut self, enabled: bool) -> Self {
        self.discover_on_miss = enabled;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

impl fmt::Debug for DialerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialerConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("identity", &self.identity)
            .field("force_provision", &self.force_provision)
            .field("endpoint_selectors", &self.endpoint_selectors)
            .field("binding_kind", &self.binding_kind)
            .field("ingress_endpoint", &self.ingress_endpoint)
            .field("root_certs", &self.root_certs.as_ref().map(Vec::len))
            .field("fallback_dialer", &self.fallback_dialer.is_some())
            .field("refresh_interval", &self.refresh_interval)
            .field("discover_on_miss", &self.discover_on_miss)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
