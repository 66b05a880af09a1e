use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P384_SHA384};

use crate::directory::{DirectoryClient, DirectoryError, RegistrationRequest};
use crate::identity::{Identity, IdentityError};
use crate::store::{IdentityStore, StoreError};
use crate::tls::crypto_provider;

/// Organization placed in the CSR subject.
pub const CSR_ORGANIZATION: &str = "tom-dialer";

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("identity store: {0}")]
    Store(#[from] StoreError),

    #[error("registration: {0}")]
    Directory(#[from] DirectoryError),

    #[error("key generation: {0}")]
    KeyGeneration(#[from] rcgen::Error),

    #[error("registration returned no certificate")]
    MissingCertificate,

    #[error("unusable identity: {0}")]
    Identity(#[from] IdentityError),
}

/// Makes sure a usable identity exists, registering a fresh one if needed.
pub struct Provisioner {
    store: Arc<dyn IdentityStore>,
    directory: Arc<DirectoryClient>,
    endpoint_selectors: Vec<String>,
}

impl Provisioner {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        directory: Arc<DirectoryClient>,
        endpoint_selectors: Vec<String>,
    ) -> Self {
        Self {
            store,
            directory,
            endpoint_selectors,
        }
    }

    /// Return the stored identity if it is usable, otherwise provision and
    /// persist a new one. `force` skips the store check.
    pub async fn ensure_identity(&self, force: bool) -> Result<Identity, ProvisioningError> {
        if !force && self.store.exists().await? {
            match self.store.load().await {
                Ok(identity) => match identity.validate(&crypto_provider()) {
                    Ok(()) => {
                        tracing::info!(
                            registration_id = %identity.registration_id(),
                            "using stored identity"
                        );
                        return Ok(identity);
                    }
                    Err(e) => tracing::warn!("stored identity unusable, provisioning a new one: {e}"),
                },
                Err(e) => tracing::warn!("failed to load stored identity, provisioning a new one: {e}"),
            }
        }
        self.provision().await
    }

    async fn provision(&self) -> Result<Identity, ProvisioningError> {
        let (key_pem, csr_pem) = generate_csr()?;
        let request = RegistrationRequest::for_bindings(self.endpoint_selectors.clone(), csr_pem);
        let response = self.directory.register(&request).await?;

        let cert = response
            .binding
            .map(|b| b.cert.cert)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProvisioningError::MissingCertificate)?;

        let identity = Identity::new(key_pem, cert, response.id);
        self.store.save(&identity).await?;
        tracing::info!(
            registration_id = %identity.registration_id(),
            "identity provisioned"
        );
        Ok(identity)
    }
}

/// Fresh P-384 key and a CSR for it, both PEM.
pub(crate) fn generate_csr() -> Result<(String, String), rcgen::Error> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)?;
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, CSR_ORGANIZATION);
    params.distinguished_name = dn;
    let csr = params.serialize_request(&key)?;
    Ok((key.serialize_pem(), csr.pem()?))
}
