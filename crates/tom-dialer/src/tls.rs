//! Client TLS configuration for the relay ingress.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use webpki_types::{CertificateDer, ServerName, UnixTime};

use crate::identity::Identity;
use crate::provision::ProvisioningError;
use crate::TomDialerError;

pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the mutual-TLS client config presenting `identity`.
///
/// With `roots`, the ingress certificate is verified against them. Without,
/// the ingress certificate is accepted as-is.
pub(crate) fn client_config(
    identity: &Identity,
    roots: Option<&[CertificateDer<'static>]>,
) -> Result<Arc<ClientConfig>, TomDialerError> {
    let provider = crypto_provider();
    identity
        .validate(&provider)
        .map_err(ProvisioningError::Identity)?;
    let chain = identity
        .certificate_chain()
        .map_err(ProvisioningError::Identity)?;
    let key = identity.private_key().map_err(ProvisioningError::Identity)?;

    let builder =
        ClientConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

    let builder = match roots {
        Some(certs) => {
            let mut store = RootCertStore::empty();
            let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
            if added == 0 {
                return Err(TomDialerError::Config(format!(
                    "no usable root certificates ({ignored} ignored)"
                )));
            }
            builder.with_root_certificates(store)
        }
        None => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider))),
    };

    Ok(Arc::new(builder.with_client_auth_cert(chain, key)?))
}

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
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
