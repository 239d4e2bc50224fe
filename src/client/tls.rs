//! TLS material for TCP daemons
//!
//! bollard reads client identity and trust roots from files, so inline
//! material and certificate directories are both staged into a private
//! scratch directory before connecting.

use crate::connection::{ClientCredentials, ConnectionSpec};
use crate::error::TransportError;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Docker's file names inside a certificate directory
const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";
const CA_FILE: &str = "ca.pem";

/// PEM bytes gathered from inline material or a certificate directory
#[derive(Debug, Default)]
pub struct TlsMaterial {
    pub cert: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
    pub ca: Option<Vec<u8>>,
    origin: Option<PathBuf>,
}

/// Staged files; they disappear when this is dropped
#[derive(Debug)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
    _scratch: TempDir,
}

/// Gather and stage the material a TLS connection needs.
///
/// A missing CA stages an empty `ca.pem`, leaving verification to bollard's
/// built-in roots.
pub fn stage(spec: &ConnectionSpec) -> Result<TlsFiles, TransportError> {
    let material = load_material(spec)?;
    let (cert, key) = match (&material.cert, &material.key) {
        (Some(cert), Some(key)) => (cert, key),
        _ => {
            return Err(tls_failed(
                material.origin,
                "TLS to the daemon needs a client certificate and key",
            ))
        }
    };

    let scratch = tempfile::Builder::new()
        .prefix("swarmctl-tls-")
        .tempdir()
        .map_err(|e| tls_failed(None, e))?;

    let files = TlsFiles {
        cert: write_private(scratch.path(), CERT_FILE, cert)?,
        key: write_private(scratch.path(), KEY_FILE, key)?,
        ca: write_private(scratch.path(), CA_FILE, material.ca.as_deref().unwrap_or_default())?,
        _scratch: scratch,
    };
    Ok(files)
}

/// Read the material a spec points at; directory files are read here, not at resolution
pub fn load_material(spec: &ConnectionSpec) -> Result<TlsMaterial, TransportError> {
    let mut material = match &spec.credentials {
        ClientCredentials::None => TlsMaterial::default(),
        ClientCredentials::Inline { cert_pem, key_pem } => TlsMaterial {
            cert: Some(cert_pem.clone()),
            key: Some(key_pem.clone()),
            ..Default::default()
        },
        ClientCredentials::Directory(dir) => {
            let ca_path = dir.join(CA_FILE);
            let ca = if ca_path.exists() {
                Some(read_pem_file(&ca_path)?)
            } else {
                None
            };
            TlsMaterial {
                cert: Some(read_pem_file(&dir.join(CERT_FILE))?),
                key: Some(read_pem_file(&dir.join(KEY_FILE))?),
                ca,
                origin: Some(dir.clone()),
            }
        }
    };

    if let Some(ca) = &spec.ca_pem {
        material.ca = Some(ca.clone());
    }

    Ok(material)
}

fn read_pem_file(path: &Path) -> Result<Vec<u8>, TransportError> {
    let bytes = fs::read(path).map_err(|e| tls_failed(Some(path.to_path_buf()), e))?;
    match pem::parse_many(&bytes) {
        Ok(blocks) if !blocks.is_empty() => Ok(bytes),
        Ok(_) => Err(tls_failed(Some(path.to_path_buf()), "no PEM block found")),
        Err(e) => Err(tls_failed(Some(path.to_path_buf()), e)),
    }
}

fn write_private(dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf, TransportError> {
    let path = dir.join(name);
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&path)
        .map_err(|e| tls_failed(Some(path.clone()), e))?;
    file.write_all(content)
        .map_err(|e| tls_failed(Some(path.clone()), e))?;
    Ok(path)
}

fn tls_failed(path: Option<PathBuf>, reason: impl std::fmt::Display) -> TransportError {
    TransportError::TlsSetupFailed {
        path,
        reason: reason.to_string(),
    }
}
