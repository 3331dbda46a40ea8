use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProbeError, Result};

/// Client-side TLS settings for a probe module.
///
/// `starttls` names an in-band upgrade protocol; when unset and TLS is
/// enabled the handshake is the first thing on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM bundle of trusted roots; the bundled Mozilla roots when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// SNI and verification name; the target host when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub insecure_skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starttls: Option<String>,
}

impl TlsConfig {
    /// Build a rustls client configuration from these settings
    pub fn generate_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = Arc::new(ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ProbeError::tls_config("unsupported protocol versions", e))?;

        let builder = if self.insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
        } else {
            builder.with_root_certificates(self.root_store()?)
        };

        let config = match (&self.cert_file, &self.key_file) {
            (Some(cert_file), Some(key_file)) => {
                let certs = load_certs(cert_file)?;
                let key = load_private_key(key_file)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| ProbeError::tls_config("invalid client certificate", e))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(ProbeError::tls_config_msg(
                    "cert_file and key_file must be configured together",
                ));
            }
        };

        Ok(Arc::new(config))
    }

    /// Name presented for SNI and checked against the peer certificate
    pub fn server_name(&self, host: &str) -> Result<ServerName<'static>> {
        let name = self.server_name.as_deref().unwrap_or(host);
        ServerName::try_from(name.to_owned())
            .map_err(|e| ProbeError::tls_config(format!("invalid server name {name:?}"), e))
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let Some(ca_file) = &self.ca_file else {
            return Ok(RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()));
        };

        let mut roots = RootCertStore::empty();
        for cert in load_certs(ca_file)? {
            roots.add(cert).map_err(|e| {
                ProbeError::tls_config(format!("bad CA in {}", ca_file.display()), e)
            })?;
        }
        Ok(roots)
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| ProbeError::tls_config(format!("reading {}", path.display()), e))?;

    if certs.is_empty() {
        return Err(ProbeError::tls_config_msg(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ProbeError::tls_config(format!("reading {}", path.display()), e))?
        .ok_or_else(|| ProbeError::tls_config_msg(format!("no private key in {}", path.display())))
}

fn open_pem(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ProbeError::tls_config(format!("opening {}", path.display()), e))
}

/// Earliest `notAfter` in the chain, in seconds since the epoch.
///
/// Certificates that fail to parse are skipped.
pub fn earliest_cert_expiry(certs: &[CertificateDer<'_>]) -> Option<i64> {
    certs
        .iter()
        .filter_map(|der| match x509_parser::parse_x509_certificate(der.as_ref()) {
            Ok((_, cert)) => Some(cert.validity().not_after.timestamp()),
            Err(e) => {
                debug!("Skipping unparsable peer certificate: {e}");
                None
            }
        })
        .min()
}

/// Accepts any server certificate; used for `insecure_skip_verify`.
/// Handshake signatures are still checked.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
