use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tom_binding::ConnectRequest;
use webpki_types::ServerName;

use crate::address::{parse_address, split_host_port};
use crate::config::DialerConfig;
use crate::connection::{BindingInfo, BoxedStream, Connection, ContextDialer};
use crate::directory::DirectoryClient;
use crate::endpoint::{endpoints_from_listing, Endpoint, EndpointCache};
use crate::error::AttemptError;
use crate::identity::Identity;
use crate::provision::{Provisioner, ProvisioningError};
use crate::retry::RetryPolicy;
use crate::tls;
use crate::TomDialerError;

/// Upper bound on a single background refresh.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Dials bound endpoints through the relay ingress, and everything else
/// through an optional fallback dialer.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Dialer {
    inner: Arc<Inner>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    registration_id: String,
    ingress_endpoint: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    directory: Option<Arc<DirectoryClient>>,
    cache: EndpointCache,
    ingress_dialer: Arc<dyn ContextDialer>,
    fallback_dialer: Option<Arc<dyn ContextDialer>>,
    retry: RetryPolicy,
    discover_on_miss: bool,
    /// Serializes discoveries triggered by cache misses.
    miss_lock: Mutex<()>,
    /// Completed miss discoveries; a miss that sees this move while
    /// waiting on `miss_lock` reuses that result.
    miss_discoveries: AtomicU64,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Dialer {
    /// Resolve an identity, build the TLS client, run a first discovery and
    /// start the background refresh.
    ///
    /// Identity comes from, in order: the configured identity; the store
    /// via provisioning when an API key is set; the store alone.
    pub async fn new(config: DialerConfig) -> Result<Self, TomDialerError> {
        let directory = match &config.api_key {
            Some(key) => Some(Arc::new(DirectoryClient::new(
                &config.api_url,
                key.clone(),
                config.binding_kind.clone(),
                config.api_timeout,
            )?)),
            None => None,
        };

        let identity = resolve_identity(&config, directory.as_ref()).await?;
        let tls_config = tls::client_config(&identity, config.root_certs.as_deref())?;

        let (ingress_host, _) = split_host_port(&config.ingress_endpoint).map_err(|reason| {
            TomDialerError::Config(format!(
                "invalid ingress endpoint {:?}: {reason}",
                config.ingress_endpoint
            ))
        })?;
        let server_name = ServerName::try_from(ingress_host.to_string()).map_err(|e| {
            TomDialerError::Config(format!("invalid ingress host {ingress_host:?}: {e}"))
        })?;

        let inner = Arc::new(Inner {
            registration_id: identity.registration_id().to_string(),
            ingress_endpoint: config.ingress_endpoint.clone(),
            server_name,
            connector: TlsConnector::from(tls_config),
            directory,
            cache: EndpointCache::new(),
            ingress_dialer: config.ingress_dialer.clone(),
            fallback_dialer: config.fallback_dialer.clone(),
            retry: config.retry,
            discover_on_miss: config.discover_on_miss,
            miss_lock: Mutex::new(()),
            miss_discoveries: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let mut refresh_task = None;
        if inner.directory.is_some() {
            match inner.discover().await {
                Ok(endpoints) => tracing::info!(count = endpoints.len(), "initial endpoint discovery"),
                Err(e) => tracing::warn!("initial endpoint discovery failed: {e}"),
            }
            if !config.refresh_interval.is_zero() {
                refresh_task = Some(tokio::spawn(refresh_loop(
                    inner.clone(),
                    config.refresh_interval,
                )));
            }
        }

        tracing::info!(
            registration_id = %inner.registration_id,
            ingress = %inner.ingress_endpoint,
            "dialer ready"
        );

        Ok(Self {
            inner,
            refresh_task: Mutex::new(refresh_task),
        })
    }

    /// Dial without a cancellation source.
    pub async fn dial(&self, network: &str, address: &str) -> Result<Connection, TomDialerError> {
        self.dial_context(&CancellationToken::new(), network, address)
            .await
    }

    /// Dial `address`. Bound endpoints go through the relay with retry;
    /// other addresses go to the fallback dialer, if any.
    ///
    /// Cancelling `cancel` aborts the dial, including any backoff wait.
    pub async fn dial_context(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<Connection, TomDialerError> {
        self.inner.dial_context(cancel, network, address).await
    }

    /// Query the directory now and replace the cache with the result.
    pub async fn discover_endpoints(&self) -> Result<Vec<Endpoint>, TomDialerError> {
        self.inner.discover().await
    }

    /// Current cache contents, keyed by hostname.
    pub async fn endpoints(&self) -> Arc<HashMap<String, Endpoint>> {
        self.inner.cache.snapshot().await
    }

    pub async fn is_bound(&self, hostname: &str) -> bool {
        self.inner.cache.contains(hostname).await
    }

    pub fn registration_id(&self) -> &str {
        &self.inner.registration_id
    }

    pub fn ingress_endpoint(&self) -> &str {
        &self.inner.ingress_endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop the background refresh and reject further dials. Returns once
    /// the refresh task has exited. Safe to call more than once.
    pub async fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("dialer closing");
            self.inner.shutdown.cancel();
        }
        // held across the await so a concurrent close also waits
        let mut task = self.refresh_task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                tracing::warn!("refresh task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Dialer {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("registration_id", &self.inner.registration_id)
            .field("ingress_endpoint", &self.inner.ingress_endpoint)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn resolve_identity(
    config: &DialerConfig,
    directory: Option<&Arc<DirectoryClient>>,
) -> Result<Identity, TomDialerError> {
    if let Some(identity) = &config.identity {
        return Ok(identity.clone());
    }

    if let Some(directory) = directory {
        let provisioner = Provisioner::new(
            config.store.clone(),
            directory.clone(),
            config.endpoint_selectors.clone(),
        );
        return Ok(provisioner.ensure_identity(config.force_provision).await?);
    }

    if config
        .store
        .exists()
        .await
        .map_err(ProvisioningError::Store)?
    {
        return Ok(config.store.load().await.map_err(ProvisioningError::Store)?);
    }

    Err(TomDialerError::Config(
        "no identity: configure one, set an API key, or populate the identity store".into(),
    ))
}

async fn refresh_loop(inner: Arc<Inner>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick fires immediately; construction already discovered
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let refresh = tokio::time::timeout(REFRESH_TIMEOUT, inner.discover());
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = refresh => match res {
                Ok(Ok(endpoints)) => tracing::debug!(count = endpoints.len(), "endpoints refreshed"),
                Ok(Err(e)) => tracing::warn!("endpoint refresh failed: {e}"),
                Err(_) => tracing::warn!("endpoint refresh timed out after {REFRESH_TIMEOUT:?}"),
            },
        }
    }
    tracing::debug!("refresh loop stopped");
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn discover(&self) -> Result<Vec<Endpoint>, TomDialerError> {
        if self.is_closed() {
            return Err(TomDialerError::Closed);
        }
        let directory = self.directory.as_ref().ok_or_else(|| {
            TomDialerError::Config("endpoint discovery needs an API key".into())
        })?;
        if self.registration_id.is_empty() {
            return Err(TomDialerError::Config(
                "endpoint discovery needs a registration id".into(),
            ));
        }

        let listed = directory.list_bound_endpoints(&self.registration_id).await?;
        let endpoints = endpoints_from_listing(&listed);
        self.cache.replace(&endpoints).await;
        Ok(endpoints)
    }

    /// Cache lookup, with one discovery on a miss when enabled.
    ///
    /// Concurrent misses share a single discovery: whoever waits on
    /// `miss_lock` while another miss discovers takes that result.
    async fn lookup(
        &self,
        cancel: &CancellationToken,
        hostname: &str,
    ) -> Result<Option<Endpoint>, TomDialerError> {
        if let Some(endpoint) = self.cache.get(hostname).await {
            return Ok(Some(endpoint));
        }
        if !self.discover_on_miss || self.directory.is_none() {
            return Ok(None);
        }

        let seen = self.miss_discoveries.load(Ordering::Acquire);
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TomDialerError::Cancelled),
            guard = self.miss_lock.lock() => guard,
        };
        if self.miss_discoveries.load(Ordering::Acquire) != seen {
            tracing::trace!(%hostname, "cache miss served by concurrent discovery");
            return Ok(self.cache.get(hostname).await);
        }

        tracing::debug!(%hostname, "cache miss, discovering");
        let discovered = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TomDialerError::Cancelled),
            res = self.discover() => res,
        };
        self.miss_discoveries.fetch_add(1, Ordering::Release);
        if let Err(e) = discovered {
            tracing::warn!(%hostname, "discovery on cache miss failed: {e}");
            return Ok(None);
        }
        Ok(self.cache.get(hostname).await)
    }

    async fn dial_context(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<Connection, TomDialerError> {
        if self.is_closed() {
            return Err(TomDialerError::Closed);
        }

        let (hostname, port) = parse_address(address)?;

        let Some(endpoint) = self.lookup(cancel, &hostname).await? else {
            return match &self.fallback_dialer {
                Some(fallback) => {
                    tracing::debug!(%address, "not a bound endpoint, using fallback dialer");
                    fallback
                        .dial_context(cancel, network, address)
                        .await
                        .map(Connection::plain)
                        .map_err(|source| TomDialerError::Fallback {
                            address: address.to_string(),
                            source,
                        })
                }
                None => Err(TomDialerError::EndpointNotFound { hostname }),
            };
        };

        if !matches!(network, "tcp" | "tcp4" | "tcp6") {
            return Err(TomDialerError::UnsupportedNetwork(network.to_string()));
        }

        tracing::debug!(
            %hostname,
            port,
            endpoint_id = %endpoint.id,
            protocol = %endpoint.protocol,
            "dialing bound endpoint"
        );
        self.dial_with_retry(cancel, &hostname, port).await
    }

    async fn dial_with_retry(
        &self,
        cancel: &CancellationToken,
        hostname: &str,
        port: u16,
    ) -> Result<Connection, TomDialerError> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TomDialerError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(TomDialerError::Closed),
                res = self.dial_once(cancel, hostname, port) => res,
            };

            let err = match result {
                Ok(conn) => {
                    if attempt > 1 {
                        tracing::info!(%hostname, port, attempt, "bound dial succeeded after retry");
                    }
                    return Ok(conn);
                }
                Err(e) => e,
            };

            if cancel.is_cancelled() {
                return Err(TomDialerError::Cancelled);
            }
            if attempt >= max_attempts {
                tracing::warn!(%hostname, port, attempts = attempt, "bound dial failed: {err}");
                return Err(err.into_error(&self.ingress_endpoint, hostname, port, attempt));
            }

            let backoff = self.retry.backoff(attempt);
            tracing::debug!(%hostname, port, attempt, ?backoff, "bound dial attempt failed: {err}");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TomDialerError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(TomDialerError::Closed),
                _ = tokio::time::sleep(backoff) => {}
            }
            attempt += 1;
        }
    }

    /// One attempt: TCP to the ingress, TLS handshake, binding exchange.
    async fn dial_once(
        &self,
        cancel: &CancellationToken,
        hostname: &str,
        port: u16,
    ) -> Result<Connection, AttemptError> {
        let tcp = self
            .ingress_dialer
            .dial_context(cancel, "tcp", &self.ingress_endpoint)
            .await
            .map_err(AttemptError::Dial)?;

        let mut stream = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(AttemptError::Handshake)?;

        tom_binding::write_request(&mut stream, &ConnectRequest::new(hostname, port)).await?;
        let response = tom_binding::read_response(&mut stream).await?.into_result()?;

        let binding = BindingInfo {
            hostname: hostname.to_string(),
            port,
            endpoint_id: response.endpoint_id,
            proto: response.proto,
        };
        Ok(Connection::bound(Box::new(stream) as BoxedStream, binding))
    }
}
