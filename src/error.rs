//! Error types for swarmctl

use std::path::PathBuf;
use thiserror::Error;

/// Result type for swarmctl operations
pub type Result<T> = std::result::Result<T, SwarmError>;

/// swarmctl error types
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Invalid connection configuration: {0}")]
    InvalidConnectionConfig(#[from] ConnectionConfigError),

    #[error("Invalid credential format in {field}: {reason}")]
    InvalidCredentialFormat { field: &'static str, reason: String },

    #[error("Transport construction failed: {0}")]
    TransportConstructionFailed(#[from] TransportError),

    #[error("Daemon {call} failed on {host}{}: {message}", http_status(.status))]
    DaemonOperationFailed {
        call: &'static str,
        host: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{kind} settings cannot be updated in place; recreate the resource to change them")]
    UnsupportedOperation { kind: &'static str },

    #[error("{kind} drifted: persisted node {persisted} but daemon reports {observed}; the resource must be recreated")]
    DriftDetected {
        kind: &'static str,
        persisted: String,
        observed: String,
    },

    #[error("Invalid resource configuration: {0}")]
    InvalidResourceConfig(String),

    #[error("{kind} {verb} did not complete before the deadline; no state change applied")]
    DeadlineExceeded {
        kind: &'static str,
        verb: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SwarmError {
    /// Whether re-invoking the same operation could succeed without a config change
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwarmError::DaemonOperationFailed { .. }
                | SwarmError::DeadlineExceeded { .. }
                | SwarmError::Io(_)
        )
    }
}

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

fn material_origin(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "inline material".to_string(),
    }
}

/// Mutually exclusive or incomplete TLS settings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionConfigError {
    #[error("{present} was supplied without {missing}")]
    MissingCredentialMaterial {
        present: &'static str,
        missing: &'static str,
    },

    #[error("inline cert_material/key_material cannot be combined with cert_path")]
    MixedCredentialSources,
}

/// Failures while turning a connection spec into a live client
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("unsupported scheme {scheme:?} in host {host:?}")]
    UnsupportedScheme { scheme: String, host: String },

    #[error("TLS setup failed for {}: {reason}", material_origin(.path))]
    TlsSetupFailed {
        path: Option<PathBuf>,
        reason: String,
    },

    #[error("SSH tunnel setup failed: {0}")]
    SshSetup(String),

    #[error("invalid api_version {0:?} (expected major.minor)")]
    InvalidApiVersion(String),

    #[error("docker client setup failed for {host}: {reason}")]
    ClientSetup { host: String, reason: String },
}
