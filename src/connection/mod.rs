//! Connection descriptors for reaching a Docker daemon
//!
//! A [`NodeConnection`] is the raw, optional-field-heavy shape declared on each
//! resource. [`resolve`] turns it into a [`ConnectionSpec`] that the client
//! factory can build a transport from. Resolution is pure: it validates inline
//! PEM material immediately but leaves certificate directories untouched until
//! a client is constructed.

use crate::error::{ConnectionConfigError, Result, SwarmError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Default daemon host when none is declared
pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

/// Per-resource Docker connection configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConnection {
    /// Daemon host URI (`unix://`, `tcp://`, `ssh://`)
    #[serde(default)]
    pub host: String,
    /// Docker context name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Extra arguments for the ssh client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_opts: Option<Vec<String>>,
    /// PEM-encoded client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_material: Option<String>,
    /// PEM-encoded client private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_material: Option<String>,
    /// PEM-encoded CA certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_material: Option<String>,
    /// Directory holding cert.pem, key.pem and optionally ca.pem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<String>,
    /// Pinned Engine API version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Where the client certificate and key come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    /// No client certificate (no mutual TLS)
    None,
    /// Inline PEM blocks, already validated
    Inline { cert_pem: Vec<u8>, key_pem: Vec<u8> },
    /// Certificate directory, read at client construction
    Directory(PathBuf),
}

/// Validated transport configuration for one daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub host: String,
    pub ssh_opts: Vec<String>,
    pub credentials: ClientCredentials,
    pub ca_pem: Option<Vec<u8>>,
    pub api_version: Option<String>,
    pub context: Option<String>,
}

impl ConnectionSpec {
    /// Inline client certificate, if any
    pub fn cert_pem(&self) -> Option<&[u8]> {
        match &self.credentials {
            ClientCredentials::Inline { cert_pem, .. } => Some(cert_pem),
            _ => None,
        }
    }

    /// Inline client key, if any
    pub fn key_pem(&self) -> Option<&[u8]> {
        match &self.credentials {
            ClientCredentials::Inline { key_pem, .. } => Some(key_pem),
            _ => None,
        }
    }

    /// Certificate directory, if any
    pub fn cert_dir(&self) -> Option<&PathBuf> {
        match &self.credentials {
            ClientCredentials::Directory(path) => Some(path),
            _ => None,
        }
    }

    /// Whether any TLS material was declared
    pub fn wants_tls(&self) -> bool {
        self.credentials != ClientCredentials::None || self.ca_pem.is_some()
    }

    /// Scheme portion of the host URI
    pub fn scheme(&self) -> Option<&str> {
        self.host.split_once("://").map(|(scheme, _)| scheme)
    }
}

/// Normalize and validate a raw node connection
pub fn resolve(raw: &NodeConnection) -> Result<ConnectionSpec> {
    let host = match raw.host.trim() {
        "" => DEFAULT_HOST.to_string(),
        h => h.to_string(),
    };

    let cert = present(&raw.cert_material);
    let key = present(&raw.key_material);
    let ca = present(&raw.ca_material);
    let cert_path = present(&raw.cert_path);

    let credentials = match (cert, key) {
        (Some(_), None) => {
            return Err(ConnectionConfigError::MissingCredentialMaterial {
                present: "cert_material",
                missing: "key_material",
            }
            .into())
        }
        (None, Some(_)) => {
            return Err(ConnectionConfigError::MissingCredentialMaterial {
                present: "key_material",
                missing: "cert_material",
            }
            .into())
        }
        (Some(_), Some(_)) if cert_path.is_some() => {
            return Err(ConnectionConfigError::MixedCredentialSources.into())
        }
        (Some(cert), Some(key)) => {
            validate_pem("cert_material", cert, PemKind::Certificate)?;
            validate_pem("key_material", key, PemKind::PrivateKey)?;
            ClientCredentials::Inline {
                cert_pem: cert.as_bytes().to_vec(),
                key_pem: key.as_bytes().to_vec(),
            }
        }
        (None, None) => match cert_path {
            Some(path) => ClientCredentials::Directory(PathBuf::from(path)),
            None => ClientCredentials::None,
        },
    };

    let ca_pem = match ca {
        Some(ca) => {
            validate_pem("ca_material", ca, PemKind::Certificate)?;
            Some(ca.as_bytes().to_vec())
        }
        None => None,
    };

    let spec = ConnectionSpec {
        host,
        ssh_opts: raw.ssh_opts.clone().unwrap_or_default(),
        credentials,
        ca_pem,
        api_version: present(&raw.api_version).map(|v| v.trim().to_string()),
        context: present(&raw.context).map(str::to_string),
    };

    debug!(
        "Resolved connection to {} (tls: {}, ssh opts: {})",
        spec.host,
        spec.wants_tls(),
        spec.ssh_opts.len()
    );

    Ok(spec)
}

/// Treat unset and blank strings alike
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Copy)]
enum PemKind {
    Certificate,
    PrivateKey,
}

fn validate_pem(field: &'static str, material: &str, kind: PemKind) -> Result<()> {
    let blocks = pem::parse_many(material).map_err(|e| SwarmError::InvalidCredentialFormat {
        field,
        reason: e.to_string(),
    })?;

    let first = blocks
        .first()
        .ok_or_else(|| SwarmError::InvalidCredentialFormat {
            field,
            reason: "no PEM block found".to_string(),
        })?;

    let tag_ok = match kind {
        PemKind::Certificate => blocks.iter().all(|b| b.tag() == "CERTIFICATE"),
        PemKind::PrivateKey => first.tag().ends_with("PRIVATE KEY"),
    };

    if !tag_ok {
        return Err(SwarmError::InvalidCredentialFormat {
            field,
            reason: format!("unexpected PEM block type {:?}", first.tag()),
        });
    }

    Ok(())
}
