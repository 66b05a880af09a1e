//! Binding dialer: opens connections to endpoints that are bound to a relay,
//! from outside the network they live in.
//!
//! A dial for a bound hostname connects to the relay ingress over mutual TLS
//! (client certificate provisioned through the endpoint directory), sends a
//! binding request naming the target, and hands back the upgraded stream.
//! Hostnames that are not bound go to an optional fallback dialer.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::io::AsyncWriteExt;
//! use tom_dialer::{Dialer, DialerConfig, TcpDialer};
//!
//! # async fn example() -> Result<(), tom_dialer::TomDialerError> {
//! let dialer = Dialer::new(
//!     DialerConfig::new()
//!         .api_key("key_123")
//!         .fallback_dialer(Arc::new(TcpDialer::new())),
//! )
//! .await?;
//!
//! let mut conn = dialer.dial("tcp", "my-app.internal:8080").await?;
//! if let Some(binding) = conn.binding() {
//!     println!("bound via endpoint {}", binding.endpoint_id);
//! }
//! conn.write_all(b"hello").await.ok();
//!
//! dialer.close().await;
//! # Ok(())
//! # }
//! ```

mod address;
mod config;
mod connection;
mod dialer;
mod directory;
mod endpoint;
mod error;
mod identity;
mod provision;
mod retry;
mod store;
mod tls;

pub use address::{parse_address, DEFAULT_PORT};
pub use config::{
    DialerConfig, API_KEY_ENV, DEFAULT_API_URL, DEFAULT_BINDING_KIND, DEFAULT_INGRESS_ENDPOINT,
};
pub use connection::{AsyncStream, BindingInfo, BoxedStream, Connection, ContextDialer, TcpDialer};
pub use dialer::Dialer;
pub use directory::{
    BindingRequest, BindingResponse, DirectoryClient, DirectoryError, IssuedCertificate,
    RawEndpoint, RegistrationRequest, RegistrationResponse, API_VERSION, API_VERSION_HEADER,
};
pub use endpoint::{endpoints_from_listing, Endpoint, EndpointCache, Protocol};
pub use error::{Stage, TomDialerError, UpgradeError};
pub use identity::{Identity, IdentityError};
pub use provision::{Provisioner, ProvisioningError, CSR_ORGANIZATION};
pub use retry::{RetryPolicy, JITTER_FRACTION};
pub use store::{
    FileStore, IdentityStore, MemoryStore, StoreError, CERT_FILE, KEY_FILE, REGISTRATION_FILE,
};

// Re-export the wire codec for relays and tests that speak the binding protocol.
pub use tom_binding;
