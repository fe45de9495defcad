//! TLS transport setup for device brokers.
//!
//! Robot vacuums present self-signed certificates that carry neither a chain
//! to a public root nor a matching hostname. Connecting to them therefore
//! needs certificate verification turned off, which is only done when the
//! device entry opts in with `insecure_tls = true`. Verified sessions check
//! the chain against the configured CA bundle. Both modes speak TLS 1.2 only.

use std::sync::Arc;

use rumqttc::tokio_rustls::rustls;
use rumqttc::tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rumqttc::tokio_rustls::rustls::version::TLS12;
use rumqttc::tokio_rustls::rustls::{
    DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion,
};
use rumqttc::{TlsConfiguration, Transport};
use tracing::{debug, warn};

use super::config::TlsSettings;
use super::mqtt_handler::SessionError;

/// The robots' brokers only speak TLS 1.2.
pub static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] = &[&TLS12];

/// Builds the transport for a session according to its TLS settings.
pub fn build_transport(settings: &TlsSettings, host: &str) -> Result<Transport, SessionError> {
    let config = if settings.verify_server {
        let roots = load_trust_store(settings)?;
        debug!(
            "Verifying {} against {} trust anchor(s) from {}",
            host,
            roots.len(),
            settings.ca_file.display()
        );
        verified_client_config(roots)
    } else {
        warn!(
            "Certificate verification disabled for {} (insecure_tls = true); the broker's identity is not checked",
            host
        );
        insecure_client_config()
    };

    Ok(Transport::tls_with_config(TlsConfiguration::Rustls(
        Arc::new(config),
    )))
}

fn load_trust_store(settings: &TlsSettings) -> Result<RootCertStore, SessionError> {
    let tls_error = |reason: String| SessionError::TlsMaterial {
        path: settings.ca_file.display().to_string(),
        reason,
    };

    let pem = std::fs::read(&settings.ca_file).map_err(|e| tls_error(e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(e.to_string()))?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if ignored > 0 {
        debug!("Skipped {} unparsable certificate(s)", ignored);
    }
    if added == 0 {
        return Err(tls_error("no usable certificates".to_string()));
    }
    Ok(roots)
}

fn verified_client_config(roots: RootCertStore) -> rustls::ClientConfig {
    rustls::ClientConfig::builder_with_protocol_versions(PROTOCOL_VERSIONS)
        .with_root_certificates(roots)
        .with_no_client_auth()
}

fn insecure_client_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder_with_protocol_versions(PROTOCOL_VERSIONS)
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth()
}

/// Accepts whatever certificate the broker presents.
#[derive(Debug)]
struct AcceptAnyServerCert;

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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::tokio_rustls::rustls::ProtocolVersion;
    use std::path::{Path, PathBuf};

    const BROKER_CERT: &str = include_str!("testdata/broker.pem");

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "roomba-switch-{}-{}.pem",
            name,
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    fn verified(ca_file: &Path) -> TlsSettings {
        TlsSettings {
            ca_file: ca_file.to_path_buf(),
            verify_server: true,
        }
    }

    #[test]
    fn only_tls12_is_offered() {
        let versions: Vec<ProtocolVersion> = PROTOCOL_VERSIONS
            .iter()
            .map(|supported| supported.version)
            .collect();
        assert_eq!(versions, vec![ProtocolVersion::TLSv1_2]);
    }

    #[test]
    fn missing_ca_bundle_is_reported() {
        let settings = verified(Path::new("/nonexistent/roomba-switch/ca.pem"));
        let result = build_transport(&settings, "10.0.0.2");
        assert!(matches!(result, Err(SessionError::TlsMaterial { .. })));
    }

    #[test]
    fn bundle_without_certificates_is_reported() {
        let path = temp_file("empty-ca", "not a certificate\n");
        let result = build_transport(&verified(&path), "10.0.0.2");
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(SessionError::TlsMaterial { .. })));
    }

    #[test]
    fn ca_bundle_loads_into_trust_store() {
        let path = temp_file("ca", BROKER_CERT);
        let roots = load_trust_store(&verified(&path));
        std::fs::remove_file(&path).unwrap();
        assert_eq!(roots.unwrap().len(), 1);
    }

    #[test]
    fn verified_transport_uses_pinned_rustls_config() {
        let path = temp_file("ca-transport", BROKER_CERT);
        let transport = build_transport(&verified(&path), "10.0.0.2");
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            transport,
            Ok(Transport::Tls(TlsConfiguration::Rustls(_)))
        ));
    }

    #[test]
    fn insecure_mode_builds_without_ca_bundle() {
        let settings = TlsSettings {
            ca_file: PathBuf::from("/nonexistent/roomba-switch/ca.pem"),
            verify_server: false,
        };
        assert!(matches!(
            build_transport(&settings, "10.0.0.2"),
            Ok(Transport::Tls(TlsConfiguration::Rustls(_)))
        ));
    }
}
