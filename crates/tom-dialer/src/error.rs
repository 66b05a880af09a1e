use std::fmt;

use tom_binding::{CodecError, Rejected};

use crate::directory::DirectoryError;
use crate::provision::ProvisioningError;

/// Where in the per-attempt sequence a bound dial failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// TCP connect to the relay ingress.
    Dial,
    /// TLS handshake with the relay ingress.
    Handshake,
    /// Binding request/response exchange.
    Upgrade,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Dial => write!(f, "dial"),
            Stage::Handshake => write!(f, "tls handshake"),
            Stage::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// Why the binding upgrade failed: the frame exchange broke, or the relay
/// answered with an error.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Rejected(#[from] Rejected),
}

/// Errors returned by the binding dialer.
#[derive(Debug, thiserror::Error)]
pub enum TomDialerError {
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("endpoint not found: {hostname}")]
    EndpointNotFound { hostname: String },

    #[error("unsupported network {0:?} for a bound endpoint")]
    UnsupportedNetwork(String),

    #[error("{stage} via {ingress} failed for {hostname}:{port} after {attempts} attempt(s): {source}")]
    Transport {
        stage: Stage,
        ingress: String,
        hostname: String,
        port: u16,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("upgrade failed for {hostname}:{port} after {attempts} attempt(s): {source}")]
    Upgrade {
        hostname: String,
        port: u16,
        attempts: u32,
        #[source]
        source: UpgradeError,
    },

    #[error("fallback dial to {address} failed: {source}")]
    Fallback {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("identity provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("endpoint discovery failed: {0}")]
    Directory(#[from] DirectoryError),

    #[error("tls configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dial cancelled")]
    Cancelled,

    #[error("dialer is closed")]
    Closed,
}

impl TomDialerError {
    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        TomDialerError::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// The stage a bound dial failed in, if this is a dial-path failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            TomDialerError::Transport { stage, .. } => Some(*stage),
            TomDialerError::Upgrade { .. } => Some(Stage::Upgrade),
            _ => None,
        }
    }

    /// The address is definitely not a bound endpoint.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TomDialerError::EndpointNotFound { .. })
    }

    /// The relay itself refused the binding (as opposed to a network failure).
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            TomDialerError::Upgrade {
                source: UpgradeError::Rejected(_),
                ..
            }
        )
    }

    /// Failures the dialer retries internally before surfacing them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TomDialerError::Transport { .. } | TomDialerError::Upgrade { .. }
        )
    }
}

/// Failure of a single dial attempt, before it is tagged with the attempt count.
#[derive(Debug)]
pub(crate) enum AttemptError {
    Dial(std::io::Error),
    Handshake(std::io::Error),
    Upgrade(UpgradeError),
}

impl AttemptError {
    pub(crate) fn into_error(
        self,
        ingress: &str,
        hostname: &str,
        port: u16,
        attempts: u32,
    ) -> TomDialerError {
        let transport = |stage, source| TomDialerError::Transport {
            stage,
            ingress: ingress.to_string(),
            hostname: hostname.to_string(),
            port,
            attempts,
            source,
        };
        match self {
            AttemptError::Dial(source) => transport(Stage::Dial, source),
            AttemptError::Handshake(source) => transport(Stage::Handshake, source),
            AttemptError::Upgrade(source) => TomDialerError::Upgrade {
                hostname: hostname.to_string(),
                port,
                attempts,
                source,
            },
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Dial(e) => write!(f, "dial: {e}"),
            AttemptError::Handshake(e) => write!(f, "tls handshake: {e}"),
            AttemptError::Upgrade(e) => write!(f, "upgrade: {e}"),
        }
    }
}

impl From<CodecError> for AttemptError {
    fn from(e: CodecError) -> Self {
        AttemptError::Upgrade(e.into())
    }
}

impl From<Rejected> for AttemptError {
    fn from(e: Rejected) -> Self {
        AttemptError::Upgrade(e.into())
    }
}
