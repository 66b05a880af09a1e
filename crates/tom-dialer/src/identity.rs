use std::fmt;

use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use webpki_types::pem::PemObject;
use webpki_types::{CertificateDer, PrivateKeyDer};

/// Errors from reading or checking a client identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("certificate is empty")]
    EmptyCertificate,

    #[error("invalid PEM: {0}")]
    Pem(#[from] webpki_types::pem::Error),

    #[error("key and certificate do not form a usable pair: {0}")]
    Tls(#[from] rustls::Error),
}

/// Client identity for the mutual TLS handshake: a PEM private key, the
/// PEM certificate chain issued for it, and the registration id the
/// directory assigned.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    key_pem: Vec<u8>,
    cert_pem: Vec<u8>,
    registration_id: String,
}

impl Identity {
    pub fn new(
        key_pem: impl Into<Vec<u8>>,
        cert_pem: impl Into<Vec<u8>>,
        registration_id: impl Into<String>,
    ) -> Self {
        Self {
            key_pem: key_pem.into(),
            cert_pem: cert_pem.into(),
            registration_id: registration_id.into(),
        }
    }

    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    pub fn has_certificate(&self) -> bool {
        !self.cert_pem.trim_ascii().is_empty()
    }

    pub fn certificate_chain(&self) -> Result<Vec<CertificateDer<'static>>, IdentityError> {
        if !self.has_certificate() {
            return Err(IdentityError::EmptyCertificate);
        }
        let chain = CertificateDer::pem_slice_iter(&self.cert_pem)
            .collect::<Result<Vec<_>, _>>()?;
        if chain.is_empty() {
            return Err(IdentityError::EmptyCertificate);
        }
        Ok(chain)
    }

    pub fn private_key(&self) -> Result<PrivateKeyDer<'static>, IdentityError> {
        Ok(PrivateKeyDer::from_pem_slice(&self.key_pem)?)
    }

    /// Check that the key parses under `provider` and matches the leaf certificate.
    pub fn validate(&self, provider: &CryptoProvider) -> Result<(), IdentityError> {
        let chain = self.certificate_chain()?;
        let key = provider.key_provider.load_private_key(self.private_key()?)?;
        CertifiedKey::new(chain, key).keys_match()?;
        Ok(())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("registration_id", &self.registration_id)
            .field("cert_pem_len", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .finish()
    }
}
