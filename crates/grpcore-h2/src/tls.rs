//! rustls configuration for secure channels.
//!
//! Client configs trust the webpki root set unless custom CA certificates
//! are given, always offer ALPN `h2`, and can layer a per-authority
//! [`CertificateCheck`] on top of chain validation.

use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion};
use tracing::warn;

use grpcore_transport_traits::{CertificateCheck, Endpoint, TlsConfig, TlsVersion, TransportError};

/// ALPN protocol id for HTTP/2.
pub const ALPN_H2: &[u8] = b"h2";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::Tls(err.to_string())
}

static TLS12_AND_UP: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn protocol_versions(version: TlsVersion) -> &'static [&'static SupportedProtocolVersion] {
    match version {
        TlsVersion::Tls12 => TLS12_AND_UP,
        TlsVersion::Tls13 => TLS13_ONLY,
    }
}

/// Build the client config for dialing `authority`.
pub fn client_config(
    tls: &TlsConfig,
    check: Option<CertificateCheck>,
    authority: &str,
) -> Result<rustls::ClientConfig, TransportError> {
    let provider = provider();
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(protocol_versions(tls.min_version))
        .map_err(tls_error)?;

    let mut verifier: Arc<dyn ServerCertVerifier> = if tls.is_insecure() {
        warn!("TLS certificate validation is disabled");
        Arc::new(InsecureVerifier {
            provider: Arc::clone(&provider),
        })
    } else {
        let roots = if tls.custom_ca_certs.is_empty() {
            RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned())
        } else {
            let mut roots = RootCertStore::empty();
            for der in &tls.custom_ca_certs {
                roots
                    .add(CertificateDer::from(der.clone()))
                    .map_err(tls_error)?;
            }
            roots
        };
        let webpki: Arc<dyn ServerCertVerifier> =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()
                .map_err(tls_error)?;
        webpki
    };

    if let Some(check) = check {
        verifier = Arc::new(AuthorityCheck {
            inner: verifier,
            check,
            authority: authority.to_string(),
        });
    }

    let mut config = builder
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(config)
}

/// Build a server config presenting `certs` and offering ALPN `h2`.
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<rustls::ServerConfig, TransportError> {
    let mut config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(tls_error)?;
    config.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(config)
}

/// The name verified against the server certificate.
pub(crate) fn server_name(
    tls: &TlsConfig,
    endpoint: &Endpoint,
) -> Result<ServerName<'static>, TransportError> {
    let host = tls.server_name.clone().unwrap_or_else(|| {
        endpoint
            .host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string()
    });
    ServerName::try_from(host).map_err(tls_error)
}

/// Accepts any certificate chain; handshake signatures are still checked.
#[derive(Debug)]
struct InsecureVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for InsecureVerifier {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Chain validation followed by the caller's per-authority check.
struct AuthorityCheck {
    inner: Arc<dyn ServerCertVerifier>,
    check: CertificateCheck,
    authority: String,
}

impl std::fmt::Debug for AuthorityCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityCheck")
            .field("inner", &self.inner)
            .field("authority", &self.authority)
            .finish_non_exhaustive()
    }
}

impl ServerCertVerifier for AuthorityCheck {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verified = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;
        (self.check)(&self.authority, end_entity.as_ref()).map_err(rustls::Error::General)?;
        Ok(verified)
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

    fn verify(verifier: &dyn ServerCertVerifier) -> Result<ServerCertVerified, rustls::Error> {
        let cert = CertificateDer::from(vec![0u8; 8]);
        let name = ServerName::try_from("localhost").unwrap();
        verifier.verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
    }

    #[test]
    fn test_default_client_config_offers_h2() {
        let config = client_config(&TlsConfig::default(), None, "localhost:443").unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn test_invalid_ca_rejected() {
        let tls = TlsConfig::with_ca_certs(vec![b"not a certificate".to_vec()]);
        assert!(matches!(
            client_config(&tls, None, "localhost:443"),
            Err(TransportError::Tls(_))
        ));
    }

    #[test]
    fn test_insecure_and_tls12_configs_build() {
        assert!(client_config(&TlsConfig::insecure(), None, "localhost:443").is_ok());

        let tls = TlsConfig {
            min_version: TlsVersion::Tls12,
            ..TlsConfig::default()
        };
        assert!(client_config(&tls, None, "localhost:443").is_ok());
    }

    #[test]
    fn test_insecure_verifier_accepts_any_chain() {
        let verifier = InsecureVerifier {
            provider: provider(),
        };
        assert!(verify(&verifier).is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[test]
    fn test_authority_check_runs_after_chain() {
        let check: CertificateCheck = Arc::new(|authority: &str, der: &[u8]| {
            assert_eq!(der.len(), 8);
            if authority == "api.example.com:443" {
                Ok(())
            } else {
                Err(format!("unexpected authority {authority}"))
            }
        });
        let inner: Arc<dyn ServerCertVerifier> = Arc::new(InsecureVerifier {
            provider: provider(),
        });

        let allowed = AuthorityCheck {
            inner: Arc::clone(&inner),
            check: Arc::clone(&check),
            authority: "api.example.com:443".to_string(),
        };
        assert!(verify(&allowed).is_ok());

        let denied = AuthorityCheck {
            inner,
            check,
            authority: "evil.example.com:443".to_string(),
        };
        assert!(matches!(verify(&denied), Err(rustls::Error::General(_))));
    }

    #[test]
    fn test_server_name() {
        let tls = TlsConfig::default();
        assert!(server_name(&tls, &Endpoint::new("127.0.0.1", 443)).is_ok());
        assert!(server_name(&tls, &Endpoint::new("[::1]", 443)).is_ok());
        assert!(server_name(&tls, &Endpoint::new("bad name!", 443)).is_err());

        let tls = TlsConfig {
            server_name: Some("api.example.com".to_string()),
            ..TlsConfig::default()
        };
        let name = server_name(&tls, &Endpoint::new("10.0.0.1", 443)).unwrap();
        assert_eq!(name.to_str(), "api.example.com");
    }
}
