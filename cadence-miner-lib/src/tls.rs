//! Client TLS setup: trust anchors and the client certificate the node
//! authenticates us with.

use std::{fs, io, path::{Path, PathBuf}};

use reqwest::{Certificate, Identity};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in CA file {0}")]
    NoCertificates(PathBuf),

    #[error("invalid certificate in {path}: {reason}")]
    InvalidCertificate { path: PathBuf, reason: String },

    #[error("invalid client key pair: {0}")]
    InvalidIdentity(String),

    #[error("building HTTPS client: {0}")]
    Client(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentityPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Where to find the trust anchors and the client key pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM bundle of CA certificates. Falls back to the system roots.
    pub ca_path: Option<PathBuf>,
    pub client_identity: Option<ClientIdentityPaths>,
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses every certificate in a PEM bundle. A truncated or corrupt block
/// fails the whole bundle.
pub fn load_ca_bundle(path: &Path) -> Result<Vec<Certificate>, TlsError> {
    let pem = read(path)?;
    let certificates =
        Certificate::from_pem_bundle(&pem).map_err(|err| TlsError::InvalidCertificate {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    if certificates.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certificates)
}

pub fn load_identity(paths: &ClientIdentityPaths) -> Result<Identity, TlsError> {
    let mut pem = read(&paths.cert)?;
    pem.push(b'\n');
    pem.extend_from_slice(&read(&paths.key)?);
    Identity::from_pem(&pem).map_err(|err| TlsError::InvalidIdentity(err.to_string()))
}

/// Builds the HTTPS client used by [`crate::HttpChannel`].
pub fn build_client(config: &TlsConfig) -> Result<reqwest::Client, TlsError> {
    let mut builder = reqwest::Client::builder().use_rustls_tls();
    if let Some(ca_path) = &config.ca_path {
        builder = builder.tls_built_in_root_certs(false);
        for certificate in load_ca_bundle(ca_path)? {
            builder = builder.add_root_certificate(certificate);
        }
    }
    if let Some(identity) = &config.client_identity {
        builder = builder.identity(load_identity(identity)?);
    }
    builder
        .build()
        .map_err(|err| TlsError::Client(err.to_string()))
}
