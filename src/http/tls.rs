//! TLS termination.
//!
//! Loads certificates and private keys into a `rustls::ServerConfig`
//! used by the accept loop's `TlsAcceptor`. HTTP/2 is negotiated via
//! ALPN when the transport config asks for it.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig as RustlsConfig;

use crate::config::ServerConfig;
use crate::config::schema::HTTP2;

pub fn load_tls_config(server: &ServerConfig) -> Result<Arc<RustlsConfig>, String> {
    let cert_file = File::open(&server.cert_file)
        .map_err(|e| format!("failed to open '{}': {}", server.cert_file, e))?;
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("failed to parse '{}': {}", server.cert_file, e))?;

    let key_file = File::open(&server.key_file)
        .map_err(|e| format!("failed to open '{}': {}", server.key_file, e))?;
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut BufReader::new(key_file))
            .map_err(|e| format!("failed to parse '{}': {}", server.key_file, e))?
            .ok_or_else(|| format!("no private key found in '{}'", server.key_file))?;

    let mut config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| format!("invalid certificate/key pair: {}", e))?;

    config.alpn_protocols = if server.http_version == HTTP2 {
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    } else {
        vec![b"http/1.1".to_vec()]
    };

    Ok(Arc::new(config))
}
