use std::fmt;
use std::io::BufReader as StdBufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::{Certificate, PrivateKey, ServerConfig, ServerConnection};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::TlsAcceptor;

const VERSIONS: &[(u16, &str)] = &[
    (0x0300, "SSLv3.0"),
    (0x0301, "TLSv1.0"),
    (0x0302, "TLSv1.1"),
    (0x0303, "TLSv1.2"),
    (0x0304, "TLSv1.3"),
];

const CIPHER_SUITES: &[(u16, &str)] = &[
    (0x0005, "TLS_RSA_WITH_RC4_128_SHA"),
    (0x000a, "TLS_RSA_WITH_3DES_EDE_CBC_SHA"),
    (0x002f, "TLS_RSA_WITH_AES_128_CBC_SHA"),
    (0x0035, "TLS_RSA_WITH_AES_256_CBC_SHA"),
    (0x003c, "TLS_RSA_WITH_AES_128_CBC_SHA256"),
    (0x009c, "TLS_RSA_WITH_AES_128_GCM_SHA256"),
    (0x009d, "TLS_RSA_WITH_AES_256_GCM_SHA384"),
    (0xc007, "TLS_ECDHE_ECDSA_WITH_RC4_128_SHA"),
    (0xc009, "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA"),
    (0xc00a, "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA"),
    (0xc011, "TLS_ECDHE_RSA_WITH_RC4_128_SHA"),
    (0xc012, "TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA"),
    (0xc013, "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA"),
    (0xc014, "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA"),
    (0xc023, "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256"),
    (0xc027, "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256"),
    (0xc02b, "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"),
    (0xc02c, "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"),
    (0xc02f, "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"),
    (0xc030, "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"),
    (0xcca8, "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256"),
    (0xcca9, "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256"),
    (0x1301, "TLS_AES_128_GCM_SHA256"),
    (0x1302, "TLS_AES_256_GCM_SHA384"),
    (0x1303, "TLS_CHACHA20_POLY1305_SHA256"),
];

/// Looks `code` up in `table`, falling back to its hex value.
fn name_or_hex(table: &[(u16, &str)], code: u16) -> String {
    table
        .iter()
        .find(|(known, _)| *known == code)
        .map_or_else(|| format!("{code:x}"), |(_, name)| name.to_string())
}

pub fn version_name(version: u16) -> String {
    name_or_hex(VERSIONS, version)
}

pub fn cipher_suite_name(suite: u16) -> String {
    name_or_hex(CIPHER_SUITES, suite)
}

/// What was negotiated by STARTTLS. Kept for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub version: u16,
    pub cipher_suite: u16,
    /// SNI name sent by the client, if any.
    pub server_name: Option<String>,
}

impl TlsInfo {
    pub fn from_connection(conn: &ServerConnection) -> Self {
        Self {
            version: conn.protocol_version().map_or(0, |v| v.get_u16()),
            cipher_suite: conn
                .negotiated_cipher_suite()
                .map_or(0, |s| s.suite().get_u16()),
            server_name: conn.server_name().map(str::to_string),
        }
    }
}

/// Renders `<version> cipher=<suite>[ name=<sni>]` for trace headers and logs.
impl fmt::Display for TlsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cipher={}",
            version_name(self.version),
            cipher_suite_name(self.cipher_suite)
        )?;
        if let Some(name) = &self.server_name {
            write!(f, " name={name}")?;
        }
        Ok(())
    }
}

/// Builds an acceptor from a PEM certificate chain and a PKCS#8 key.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_file = std::fs::File::open(cert_path)
        .with_context(|| format!("Failed to open certificate: {:?}", cert_path))?;
    let cert_chain: Vec<Certificate> = certs(&mut StdBufReader::new(cert_file))
        .map_err(|_| anyhow::anyhow!("Failed to parse certificate"))?
        .into_iter()
        .map(Certificate)
        .collect();
    if cert_chain.is_empty() {
        return Err(anyhow::anyhow!("No certificate found in {:?}", cert_path));
    }

    let key_file = std::fs::File::open(key_path)
        .with_context(|| format!("Failed to open private key: {:?}", key_path))?;
    let mut keys = pkcs8_private_keys(&mut StdBufReader::new(key_file))
        .map_err(|_| anyhow::anyhow!("Failed to parse private key"))?;
    if keys.is_empty() {
        return Err(anyhow::anyhow!("No private key found in {:?}", key_path));
    }

    acceptor_from_der(cert_chain, PrivateKey(keys.remove(0)))
}

pub fn acceptor_from_der(cert_chain: Vec<Certificate>, key: PrivateKey) -> Result<TlsAcceptor> {
    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| anyhow::anyhow!("Failed to build TLS config: {}", e))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
