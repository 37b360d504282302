//! Blocking rustls connector construction, adapted from the teacher's async
//! `net/tls/rustls.rs`: same verifier choices (full chain by default, a
//! dummy verifier under `tls_verify=unsafe_off`), rebuilt around
//! `rustls::ClientConnection` + `StreamOwned` instead of an async TLS
//! stream wrapper, since this crate's TCP transport is blocking-by-default.

use std::fs;
use std::io::{BufReader, Cursor};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{Error, Result};
use crate::options::TlsVerify;

pub type TlsStream = rustls::StreamOwned<ClientConnection, TcpStream>;

/// Wraps an already-connected `TcpStream` in TLS, verifying the server
/// certificate against the default webpki roots plus any custom
/// `tls_roots` PEM bundle, unless `tls_verify` opts out entirely.
pub fn wrap(
    stream: TcpStream,
    host: &str,
    tls_verify: TlsVerify,
    tls_roots: Option<&std::path::Path>,
) -> Result<TlsStream> {
    let config = build_client_config(tls_verify, tls_roots)?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::tls_error(format!("invalid server name {:?}: {}", host, e)))?;
    let conn = ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| Error::tls_error(format!("tls handshake setup failed: {}", e)))?;
    Ok(rustls::StreamOwned::new(conn, stream))
}

pub(crate) fn build_client_config(
    tls_verify: TlsVerify,
    tls_roots: Option<&std::path::Path>,
) -> Result<ClientConfig> {
    let builder = ClientConfig::builder();

    let config = if tls_verify == TlsVerify::UnsafeOff {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DummyTlsVerifier))
            .with_no_client_auth()
    } else {
        let mut cert_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
        };

        if let Some(path) = tls_roots {
            let pem = fs::read(path)
                .map_err(|e| Error::tls_error(format!("could not read tls_roots {:?}: {}", path, e)))?;
            let mut reader = BufReader::new(Cursor::new(pem));
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| Error::tls_error(e.to_string()))?;
                cert_store
                    .add(cert)
                    .map_err(|e| Error::tls_error(e.to_string()))?;
            }
        }

        builder
            .with_root_certificates(cert_store)
            .with_no_client_auth()
    };

    Ok(config)
}

/// Accepts any server certificate and any signature: the implementation of
/// `tls_verify=unsafe_off`.
#[derive(Debug)]
struct DummyTlsVerifier;

impl ServerCertVerifier for DummyTlsVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}
