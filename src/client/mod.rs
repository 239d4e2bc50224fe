//! Docker daemon client
//!
//! [`ClientFactory::build`] turns a [`ConnectionSpec`] into a ready
//! [`DaemonClient`] or fails without leaving anything half-built. The client
//! exposes only the swarm-membership calls the lifecycle resources need, in
//! terms of bollard's Engine API models.

mod docker;
mod ssh;
#[cfg(test)]
pub(crate) mod stub;
mod tls;
mod transport;

pub use docker::DockerClient;
pub use ssh::SshClient;
pub use transport::SshTarget;
use transport::Transport;

use crate::connection::ConnectionSpec;
use crate::error::Result;
use async_trait::async_trait;
use bollard::models::{Node, Swarm, SwarmInitRequest, SwarmJoinRequest, SystemInfo};
use bollard::ClientVersion;

/// Highest Engine API version this client speaks
pub const MAX_API_VERSION: ClientVersion = ClientVersion {
    major_version: 1,
    minor_version: 47,
};

/// Default raft listen address used by the Docker CLI
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:2377";

/// Swarm-membership operations against one daemon
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Host the client is bound to, for diagnostics
    fn host(&self) -> &str;

    /// `GET /info`
    async fn info(&self) -> Result<SystemInfo>;

    /// `POST /swarm/init`, returns the new node ID
    async fn cluster_init(&self, request: &SwarmInitRequest) -> Result<String>;

    /// `GET /swarm`
    async fn cluster_inspect(&self) -> Result<Swarm>;

    /// `POST /swarm/join`
    async fn cluster_join(&self, request: &SwarmJoinRequest) -> Result<()>;

    /// `POST /swarm/leave`
    async fn cluster_leave(&self, force: bool) -> Result<()>;

    /// `GET /nodes`
    async fn node_list(&self) -> Result<Vec<Node>>;
}

/// Builds daemon clients from resolved connection specs
pub trait ClientFactory: Send + Sync {
    fn build(&self, spec: &ConnectionSpec) -> Result<Box<dyn DaemonClient>>;
}

/// Production factory: bollard for unix and TCP, an ssh tunnel otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerClientFactory;

impl ClientFactory for DockerClientFactory {
    fn build(&self, spec: &ConnectionSpec) -> Result<Box<dyn DaemonClient>> {
        match Transport::for_spec(spec)? {
            Transport::Ssh(target) => Ok(Box::new(SshClient::new(spec, target))),
            Transport::Unix { .. } | Transport::Tcp { .. } => Ok(Box::new(DockerClient::new(spec)?)),
        }
    }
}

/// The lower of two `major.minor` API versions
fn lower_version<'a>(a: &'a str, b: &'a str) -> &'a str {
    fn parse(v: &str) -> (u32, u32) {
        let mut parts = v.trim().split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        (major, minor)
    }

    if parse(a) <= parse(b) {
        a
    } else {
        b
    }
}
