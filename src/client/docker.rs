//! Engine API client for unix sockets and TCP, built on bollard

use super::{tls, DaemonClient, Transport, MAX_API_VERSION};
use crate::connection::ConnectionSpec;
use crate::error::{Result, SwarmError, TransportError};
use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::{Node, Swarm, SwarmInitRequest, SwarmJoinRequest, SystemInfo};
use bollard::query_parameters::{LeaveSwarmOptions, ListNodesOptions};
use bollard::{ClientVersion, Docker};
use tokio::sync::OnceCell;
use tracing::debug;

/// Per-request timeout handed to bollard, in seconds
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Engine API client over a unix socket or TCP (optionally TLS)
pub struct DockerClient {
    host: String,
    docker: Docker,
    pinned: bool,
    negotiated: OnceCell<Docker>,
}

impl DockerClient {
    /// Connect lazily; no daemon I/O happens until the first call
    pub fn new(spec: &ConnectionSpec) -> std::result::Result<Self, TransportError> {
        let (version, pinned) = match &spec.api_version {
            Some(v) => (parse_version(v)?, true),
            None => (MAX_API_VERSION, false),
        };

        let setup_failed = |e: BollardError| TransportError::ClientSetup {
            host: spec.host.clone(),
            reason: e.to_string(),
        };

        let docker = match Transport::for_spec(spec)? {
            Transport::Unix { path } => Docker::connect_with_unix(
                &path.to_string_lossy(),
                REQUEST_TIMEOUT_SECS,
                &version,
            )
            .map_err(setup_failed)?,
            Transport::Tcp {
                address,
                secure: false,
            } => Docker::connect_with_http(&address, REQUEST_TIMEOUT_SECS, &version)
                .map_err(setup_failed)?,
            Transport::Tcp {
                address,
                secure: true,
            } => {
                // bollard reads the files while connecting; the staged copies go away after
                let files = tls::stage(spec)?;
                Docker::connect_with_ssl(
                    &address,
                    &files.key,
                    &files.cert,
                    &files.ca,
                    REQUEST_TIMEOUT_SECS,
                    &version,
                )
                .map_err(|e| TransportError::TlsSetupFailed {
                    path: None,
                    reason: e.to_string(),
                })?
            }
            Transport::Ssh(_) => {
                return Err(TransportError::UnsupportedScheme {
                    scheme: "ssh".to_string(),
                    host: spec.host.clone(),
                })
            }
        };

        if let Some(context) = &spec.context {
            debug!("Connecting to {} for context {}", spec.host, context);
        }

        Ok(Self {
            host: spec.host.clone(),
            docker,
            pinned,
            negotiated: OnceCell::new(),
        })
    }

    /// The client to issue calls with, negotiating the API version on first use
    async fn docker(&self) -> &Docker {
        if self.pinned {
            return &self.docker;
        }

        self.negotiated
            .get_or_init(|| async {
                match self.docker.clone().negotiate_version().await {
                    Ok(docker) => {
                        let version = docker.client_version();
                        debug!(
                            "Negotiated API version {}.{} with {}",
                            version.major_version, version.minor_version, self.host
                        );
                        docker
                    }
                    Err(e) => {
                        debug!("API version negotiation with {} failed: {}", self.host, e);
                        self.docker.clone()
                    }
                }
            })
            .await
    }

    fn failed(&self, call: &'static str, err: BollardError) -> SwarmError {
        let (status, message) = match err {
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => (Some(status_code), message),
            other => (None, other.to_string()),
        };
        SwarmError::DaemonOperationFailed {
            call,
            host: self.host.clone(),
            status,
            message,
        }
    }
}

#[async_trait]
impl DaemonClient for DockerClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn info(&self) -> Result<SystemInfo> {
        self.docker()
            .await
            .info()
            .await
            .map_err(|e| self.failed("daemon-info", e))
    }

    async fn cluster_init(&self, request: &SwarmInitRequest) -> Result<String> {
        self.docker()
            .await
            .init_swarm(request.clone())
            .await
            .map_err(|e| self.failed("cluster-init", e))
    }

    async fn cluster_inspect(&self) -> Result<Swarm> {
        self.docker()
            .await
            .inspect_swarm()
            .await
            .map_err(|e| self.failed("cluster-inspect", e))
    }

    async fn cluster_join(&self, request: &SwarmJoinRequest) -> Result<()> {
        self.docker()
            .await
            .join_swarm(request.clone())
            .await
            .map_err(|e| self.failed("cluster-join", e))
    }

    async fn cluster_leave(&self, force: bool) -> Result<()> {
        self.docker()
            .await
            .leave_swarm(Some(LeaveSwarmOptions { force }))
            .await
            .map_err(|e| self.failed("cluster-leave", e))
    }

    async fn node_list(&self) -> Result<Vec<Node>> {
        self.docker()
            .await
            .list_nodes(None::<ListNodesOptions>)
            .await
            .map_err(|e| self.failed("node-list", e))
    }
}

/// `1.43` or `v1.43` as a bollard client version
fn parse_version(raw: &str) -> std::result::Result<ClientVersion, TransportError> {
    let invalid = || TransportError::InvalidApiVersion(raw.to_string());
    let (major, minor) = raw
        .trim()
        .trim_start_matches('v')
        .split_once('.')
        .ok_or_else(invalid)?;
    Ok(ClientVersion {
        major_version: major.parse().map_err(|_| invalid())?,
        minor_version: minor.parse().map_err(|_| invalid())?,
    })
}
