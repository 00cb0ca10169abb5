// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! TLS setup from PEM files.
//!
//! Key pairs are provisioned outside of this crate; only their paths are
//! consumed here. All configs use the `ring` crypto provider.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;
use crate::error::{Error, Result};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Builds the acceptor for a TLS server.
///
/// With `request_cert`, clients are asked for a certificate checked against
/// `ca`; `reject_unauthorized = false` also admits clients without one.
pub fn server_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let key_path = tls
        .key
        .as_deref()
        .ok_or_else(|| Error::Tls("server private key required".into()))?;
    let cert_path = tls
        .cert
        .as_deref()
        .ok_or_else(|| Error::Tls("server certificate required".into()))?;

    let certs = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;
    let provider = provider();

    let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("protocol versions: {e}")))?;

    let builder = if tls.request_cert && !tls.ca.is_empty() {
        let roots = load_roots(&tls.ca)?;
        let mut verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
        if !tls.reject_unauthorized {
            verifier = verifier.allow_unauthenticated();
        }
        let verifier = verifier
            .build()
            .map_err(|e| Error::Tls(format!("client verifier error: {e}")))?;
        builder.with_client_cert_verifier(verifier)
    } else if tls.request_cert && tls.reject_unauthorized {
        return Err(Error::Tls(
            "request_cert with reject_unauthorized needs at least one CA".into(),
        ));
    } else {
        builder.with_no_client_auth()
    };

    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("server config error: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Builds the connector for a TLS client.
///
/// With `reject_unauthorized = false` any server certificate is accepted.
/// Otherwise the server must chain to one of `ca`.
pub fn client_connector(tls: &TlsConfig) -> Result<TlsConnector> {
    let provider = provider();

    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("protocol versions: {e}")))?;

    let builder = if tls.reject_unauthorized {
        if tls.ca.is_empty() {
            return Err(Error::Tls(
                "verifying the server certificate needs at least one CA".into(),
            ));
        }
        builder.with_root_certificates(load_roots(&tls.ca)?)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
    };

    let config = match (tls.key.as_deref(), tls.cert.as_deref()) {
        (Some(key_path), Some(cert_path)) => builder
            .with_client_auth_cert(load_certificates(cert_path)?, load_private_key(key_path)?)
            .map_err(|e| Error::Tls(format!("client certificate error: {e}")))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(Error::Tls(
                "client certificate needs both key and cert".into(),
            ))
        }
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Resolves the name the server certificate is verified against.
pub fn server_name(tls: &TlsConfig, host: &str) -> Result<ServerName<'static>> {
    let name = tls.server_name.as_deref().unwrap_or(host);
    ServerName::try_from(name.to_string()).map_err(|_| Error::ServerName(name.to_string()))
}

fn load_roots(paths: &[impl AsRef<Path>]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for path in paths {
        let path = path.as_ref();
        for cert in load_certificates(path)? {
            roots.add(cert).map_err(|e| Error::Certificate {
                path: path.display().to_string(),
                reason: format!("failed to add CA certificate: {e}"),
            })?;
        }
    }
    Ok(roots)
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = fs::read(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Certificate {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(Error::Certificate {
            path: path.display().to_string(),
            reason: "no certificates found".into(),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = fs::read(path)?;
    PrivateKeyDer::from_pem_slice(&pem).map_err(|e| Error::PrivateKey {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Server certificate verifier used when `reject_unauthorized` is off.
///
/// Handshake signatures are still checked; only the chain is not.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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

#[cfg(test)]
#[path = "tls_tests.rs"]
mod tests;
