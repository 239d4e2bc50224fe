//! Cluster owner resource (`swarm_init`)
//!
//! Absent → Active → Absent. Create initializes a swarm on the declared daemon
//! and records its ID and join tokens; Read re-derives both from the live
//! daemon; Delete force-leaves.

use super::{Observation, ResourceKind, SwarmResource};
use crate::client::{DaemonClient, DEFAULT_LISTEN_ADDR};
use crate::connection::NodeConnection;
use crate::error::{Result, SwarmError};
use crate::swarm::{ClusterIdentity, LocalSwarm, Sensitive};
use async_trait::async_trait;
use bollard::models::SwarmInitRequest;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Declared configuration of a cluster owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerConfig {
    #[serde(default)]
    pub node: NodeConnection,
    /// Externally reachable address advertised to other nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,
    /// Listen address for the raft consensus protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
}

impl OwnerConfig {
    fn init_request(&self) -> SwarmInitRequest {
        SwarmInitRequest {
            listen_addr: Some(
                self.listen_addr
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            ),
            advertise_addr: self.advertise_addr.clone(),
            force_new_cluster: Some(false),
            ..Default::default()
        }
    }
}

/// Observed state of a cluster owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerState {
    /// Swarm cluster ID
    pub id: String,
    pub manager_token: Sensitive,
    pub worker_token: Sensitive,
}

impl From<ClusterIdentity> for OwnerState {
    fn from(identity: ClusterIdentity) -> Self {
        Self {
            id: identity.cluster_id,
            manager_token: identity.manager_join_token,
            worker_token: identity.worker_join_token,
        }
    }
}

/// The cluster owner resource kind
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterOwner;

impl ClusterOwner {
    /// Live cluster identity, `None` when the daemon has no active swarm
    async fn inspect(&self, client: &dyn DaemonClient) -> Result<Option<ClusterIdentity>> {
        match client.cluster_inspect().await {
            Ok(inspect) => Ok(ClusterIdentity::from_inspect(inspect)),
            Err(err) => {
                // a daemon that left the swarm answers inspect with an error, not an empty ID
                let info = match client.info().await {
                    Ok(info) => info,
                    Err(info_err) => {
                        debug!("Daemon info lookup failed: {}", info_err);
                        return Err(err);
                    }
                };
                if LocalSwarm::from(info).cluster_id.is_empty() {
                    debug!("Swarm inspect failed on inactive node: {}", err);
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[async_trait]
impl SwarmResource for ClusterOwner {
    type Desired = OwnerConfig;
    type Observed = OwnerState;

    const KIND: ResourceKind = ResourceKind::ClusterOwner;

    fn node(desired: &OwnerConfig) -> &NodeConnection {
        &desired.node
    }

    async fn create(&self, client: &dyn DaemonClient, desired: &OwnerConfig) -> Result<OwnerState> {
        let node_id = client.cluster_init(&desired.init_request()).await?;
        info!("Swarm initialized on {}: node {} is now a manager", client.host(), node_id);

        let identity = client.cluster_inspect().await?;
        let identity =
            ClusterIdentity::from_inspect(identity).ok_or_else(|| SwarmError::DaemonOperationFailed {
                call: "cluster-inspect",
                host: client.host().to_string(),
                status: None,
                message: "daemon reports no active swarm right after init".to_string(),
            })?;

        Ok(identity.into())
    }

    async fn read(
        &self,
        client: &dyn DaemonClient,
        _desired: &OwnerConfig,
        observed: &OwnerState,
    ) -> Result<Observation<OwnerState>> {
        match self.inspect(client).await? {
            None => {
                info!("Swarm {} is no longer active on {}", observed.id, client.host());
                Ok(Observation::Removed)
            }
            Some(identity) => Ok(Observation::Present(identity.into())),
        }
    }

    async fn delete(&self, client: &dyn DaemonClient, observed: &OwnerState) -> Result<()> {
        // the last manager can only leave by force
        client.cluster_leave(true).await?;
        info!("Left swarm {} on {}", observed.id, client.host());
        Ok(())
    }
}
