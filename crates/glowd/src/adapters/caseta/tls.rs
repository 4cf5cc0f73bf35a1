//! TLS setup for the Smart Bridge
//!
//! The bridge authenticates us by client certificate and presents a
//! certificate signed by its own CA. Bridges are addressed by IP and their
//! certificates do not carry a matching name, so the chain is verified
//! against the bridge CA but the name check is skipped.

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls;
use tokio_rustls::rustls::client::danger::HandshakeSignatureValid;
use tokio_rustls::rustls::client::danger::ServerCertVerified;
use tokio_rustls::rustls::client::danger::ServerCertVerifier;
use tokio_rustls::rustls::client::WebPkiServerVerifier;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::pki_types::PrivateKeyDer;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::pki_types::UnixTime;
use tokio_rustls::rustls::CertificateError;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::rustls::DigitallySignedStruct;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::rustls::SignatureScheme;

use crate::error::VendorError;

fn tls_error(what: &str, path: &Path, e: impl std::fmt::Display) -> VendorError {
    VendorError::Tls(format!("{} '{}': {}", what, path.display(), e))
}

/// Build a client config that trusts only the bridge CA and presents our
/// client certificate.
pub fn client_config(cert: &Path, key: &Path, ca: &Path) -> Result<ClientConfig, VendorError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for der in CertificateDer::pem_file_iter(ca).map_err(|e| tls_error("reading CA", ca, e))? {
        let der = der.map_err(|e| tls_error("parsing CA", ca, e))?;
        roots
            .add(der)
            .map_err(|e| tls_error("loading CA", ca, e))?;
    }

    let chain = CertificateDer::pem_file_iter(cert)
        .map_err(|e| tls_error("reading certificate", cert, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error("parsing certificate", cert, e))?;
    let key_der =
        PrivateKeyDer::from_pem_file(key).map_err(|e| tls_error("reading key", key, e))?;

    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| VendorError::Tls(format!("building verifier: {}", e)))?;

    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| VendorError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(BridgeVerifier { inner }))
        .with_client_auth_cert(chain, key_der)
        .map_err(|e| VendorError::Tls(format!("client certificate: {}", e)))
}

/// Chain verification against the bridge CA, without the name check.
#[derive(Debug)]
struct BridgeVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for BridgeVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_are_tls_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");

        let err = client_config(&missing, &missing, &missing).unwrap_err();
        match err {
            VendorError::Tls(msg) => assert!(msg.contains("missing.pem")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_ca_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "").unwrap();

        // No trust anchors means the verifier cannot be built
        assert!(matches!(
            client_config(&empty, &empty, &empty),
            Err(VendorError::Tls(_))
        ));
    }
}
