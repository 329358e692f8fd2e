//! TLS support for secure connections (`clickhouses://`).
//!
//! Only available with the `tls` feature. The minimum protocol version is
//! TLS 1.2; there is deliberately no pre-1.2 downgrade path.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};

use crate::error::{Error, Result};
use crate::options::{ConnectionOptions, TlsVersion};

/// Build the rustls client configuration for `options`.
pub fn client_config(options: &ConnectionOptions) -> Result<Arc<ClientConfig>> {
    let versions: &[&rustls::SupportedProtocolVersion] = match options.tls_version {
        TlsVersion::Tls12 => &[&rustls::version::TLS12, &rustls::version::TLS13],
        TlsVersion::Tls13 => &[&rustls::version::TLS13],
    };

    let builder = ClientConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(versions)
        .map_err(|e| Error::Connection(format!("TLS configuration rejected: {e}")))?;

    let config = if options.verify {
        let mut roots = RootCertStore::empty();
        match &options.ca_certs {
            Some(path) => {
                let file = File::open(path).map_err(|e| {
                    Error::Connection(format!("cannot open CA bundle {}: {e}", path.display()))
                })?;
                let mut reader = BufReader::new(file);
                for der in rustls_pemfile::certs(&mut reader)
                    .map_err(|e| Error::Connection(format!("malformed CA bundle: {e}")))?
                {
                    roots.add(&Certificate(der)).map_err(|e| {
                        Error::Connection(format!("rejected CA certificate: {e}"))
                    })?;
                }
            }
            None => {
                let native = rustls_native_certs::load_native_certs().map_err(|e| {
                    Error::Connection(format!("cannot load system certificates: {e}"))
                })?;
                for cert in native {
                    // Individually broken system certs are skipped.
                    let _ = roots.add(&Certificate(cert.0));
                }
            }
        }
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        let mut config = builder
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCertificate));
        config
    };

    Ok(Arc::new(config))
}

/// Verifier used when `verify = false`: accepts any server certificate.
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// The SNI name for a host, falling back for IP literals.
pub fn server_name(host: &str) -> Result<ServerName> {
    ServerName::try_from(host)
        .map_err(|_| Error::Connection(format!("invalid TLS server name '{host}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insecure_config_builds_without_roots() {
        let options = ConnectionOptions { verify: false, ..Default::default() };
        assert!(client_config(&options).is_ok());
    }

    #[test]
    fn tls13_only_config_builds() {
        let options = ConnectionOptions {
            verify: false,
            tls_version: TlsVersion::Tls13,
            ..Default::default()
        };
        assert!(client_config(&options).is_ok());
    }

    #[test]
    fn server_names_parse() {
        assert!(server_name("clickhouse.example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("").is_err());
    }
}
