//! Cluster member resource (`swarm_join`)
//!
//! Absent → Joined → Absent. The node's role is guessed from the join token
//! at create time and corrected on Read from a manager's node listing.

use super::{Observation, ResourceKind, SwarmResource};
use crate::client::{DaemonClient, DEFAULT_LISTEN_ADDR};
use crate::connection::NodeConnection;
use crate::error::{Result, SwarmError};
use crate::swarm::{
    infer_role, LocalSwarm, MemberIdentity, NodeRole, NodeSummary, RoleAssessment, Sensitive,
};
use async_trait::async_trait;
use bollard::models::SwarmJoinRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Declared configuration of a cluster member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfig {
    #[serde(default)]
    pub node: NodeConnection,
    /// Token issued by the swarm; decides the role the node joins with
    pub join_token: Sensitive,
    /// Addresses of managers already in the swarm
    #[serde(default)]
    pub remote_addrs: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
}

impl MemberConfig {
    /// Reject configurations the daemon would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.join_token.expose().trim().is_empty() {
            return Err(SwarmError::InvalidResourceConfig(
                "join_token must not be empty".to_string(),
            ));
        }
        if self.remote_addrs.iter().all(|addr| addr.trim().is_empty()) {
            return Err(SwarmError::InvalidResourceConfig(
                "remote_addrs needs at least one manager address".to_string(),
            ));
        }
        Ok(())
    }

    fn join_request(&self) -> SwarmJoinRequest {
        SwarmJoinRequest {
            listen_addr: Some(
                self.listen_addr
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            ),
            advertise_addr: self.advertise_addr.clone(),
            remote_addrs: Some(
                self.remote_addrs
                    .iter()
                    .map(|addr| addr.trim())
                    .filter(|addr| !addr.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            join_token: Some(self.join_token.expose().to_string()),
            ..Default::default()
        }
    }
}

/// Observed state of a cluster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberState {
    /// Composite `<node>-<cluster>` identifier
    pub id: String,
    pub node_id: String,
    pub node_role: NodeRole,
}

impl From<MemberIdentity> for MemberState {
    fn from(identity: MemberIdentity) -> Self {
        Self {
            id: identity.composite_id,
            node_id: identity.node_id,
            node_role: identity.role.role,
        }
    }
}

/// The cluster member resource kind
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterMember;

impl ClusterMember {
    /// Refresh a membership, keeping the role's provenance visible
    pub async fn observe(
        &self,
        client: &dyn DaemonClient,
        desired: &MemberConfig,
        observed: &MemberState,
    ) -> Result<Observation<MemberIdentity>> {
        let node_id = LocalSwarm::from(client.info().await?).node_id;

        if node_id.is_empty() {
            info!("Node {} is no longer part of a swarm", observed.node_id);
            return Ok(Observation::Removed);
        }

        if node_id != observed.node_id {
            warn!(
                "Node ID on {} changed from {} to {}; membership must be recreated",
                client.host(),
                observed.node_id,
                node_id
            );
            return Ok(Observation::Drifted(SwarmError::DriftDetected {
                kind: ResourceKind::ClusterMember.as_str(),
                persisted: observed.node_id.clone(),
                observed: node_id,
            }));
        }

        let listing: Option<Vec<NodeSummary>> = match client.node_list().await {
            Ok(nodes) => Some(nodes.into_iter().map(NodeSummary::from).collect()),
            Err(err) => {
                warn!("Skipping role correction for node {}: {}", node_id, err);
                None
            }
        };

        let inferred = infer_role(desired.join_token.expose(), &node_id, listing.as_deref());
        // without a confirmation the recorded role stands
        let role = if inferred.is_confirmed() {
            if inferred.role != observed.node_role {
                info!(
                    "Node {} is reported as {}, was recorded as {}",
                    node_id, inferred.role, observed.node_role
                );
            }
            inferred
        } else {
            RoleAssessment::carried(observed.node_role)
        };

        Ok(Observation::Present(MemberIdentity {
            node_id,
            role,
            composite_id: observed.id.clone(),
        }))
    }

    async fn leave(&self, client: &dyn DaemonClient) -> Result<()> {
        match client.cluster_leave(false).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("Leaving the swarm failed ({}); retrying with force", err);
                client.cluster_leave(true).await
            }
        }
    }
}

#[async_trait]
impl SwarmResource for ClusterMember {
    type Desired = MemberConfig;
    type Observed = MemberState;

    const KIND: ResourceKind = ResourceKind::ClusterMember;

    fn node(desired: &MemberConfig) -> &NodeConnection {
        &desired.node
    }

    async fn create(
        &self,
        client: &dyn DaemonClient,
        desired: &MemberConfig,
    ) -> Result<MemberState> {
        desired.validate()?;

        let request = desired.join_request();
        debug!("Joining swarm via {:?}", request.remote_addrs);
        client
            .cluster_join(&request)
            .await
            .map_err(|err| scrub(err, &desired.join_token))?;

        let swarm = LocalSwarm::from(client.info().await?);
        if swarm.cluster_id.is_empty() {
            warn!(
                "Daemon on {} reports no cluster ID after join; recording node {} without one",
                client.host(),
                swarm.node_id
            );
        }

        let role = infer_role(desired.join_token.expose(), &swarm.node_id, None);
        let identity = MemberIdentity::new(&swarm.node_id, &swarm.cluster_id, role);

        info!(
            "Node {} joined swarm {} as {} (provisional)",
            identity.node_id, swarm.cluster_id, identity.role.role
        );
        Ok(identity.into())
    }

    async fn read(
        &self,
        client: &dyn DaemonClient,
        desired: &MemberConfig,
        observed: &MemberState,
    ) -> Result<Observation<MemberState>> {
        Ok(self
            .observe(client, desired, observed)
            .await?
            .map(MemberState::from))
    }

    async fn delete(&self, client: &dyn DaemonClient, observed: &MemberState) -> Result<()> {
        self.leave(client).await?;
        info!("Node {} left its swarm", observed.node_id);
        Ok(())
    }
}

/// Daemons may echo the token back in their error text
fn scrub(err: SwarmError, token: &Sensitive) -> SwarmError {
    match err {
        SwarmError::DaemonOperationFailed {
            call,
            host,
            status,
            message,
        } => SwarmError::DaemonOperationFailed {
            call,
            host,
            status,
            message: token.scrub(&message),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::stub::StubFactory;
    use crate::lifecycle::{LifecycleController, OperationContext};
    use crate::swarm::Confidence;

    const WORKER_TOKEN: &str = "SWMTKN-1-short-secret";

    fn config(token: &str) -> MemberConfig {
        MemberConfig {
            node: NodeConnection {
                host: "ssh://docker@10.0.0.7".to_string(),
                ..Default::default()
            },
            join_token: Sensitive::new(token),
            remote_addrs: BTreeSet::from(["10.0.0.4:2377".to_string()]),
            advertise_addr: Some("10.0.0.7".to_string()),
            listen_addr: None,
        }
    }

    fn setup() -> (StubFactory, LifecycleController<StubFactory>) {
        let factory = StubFactory::new();
        (factory.clone(), LifecycleController::new(factory))
    }

    #[tokio::test]
    async fn test_worker_join_corrected_to_manager() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();

        let state = controller
            .create(&ctx, &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();
        assert_eq!(state.node_id, "node-1");
        assert_eq!(state.id, "node-1-cluster-1");
        assert_eq!(state.node_role, NodeRole::Worker);

        factory
            .daemon
            .set_nodes(Some(vec![("node-1", NodeRole::Manager), ("node-0", NodeRole::Manager)]));

        let client = factory.daemon.clone();
        let observed = ClusterMember
            .observe(&client, &config(WORKER_TOKEN), &state)
            .await
            .unwrap();
        match observed {
            Observation::Present(identity) => {
                assert_eq!(identity.role.role, NodeRole::Manager);
                assert_eq!(identity.role.confidence, Confidence::Confirmed);
                assert_eq!(identity.composite_id, state.id);
            }
            other => panic!("unexpected observation: {:?}", other),
        }

        let refreshed = controller
            .read(&ctx, &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap()
            .into_state()
            .unwrap();
        assert_eq!(refreshed.node_role, NodeRole::Manager);
    }

    #[tokio::test]
    async fn test_manager_token_joins_as_manager() {
        let (_factory, controller) = setup();
        let token = format!("SWMTKN-1-{}-secret", "x".repeat(50));

        let state = controller
            .create(&OperationContext::new(), &ClusterMember, &config(&token))
            .await
            .unwrap();
        assert_eq!(state.node_role, NodeRole::Manager);
    }

    #[tokio::test]
    async fn test_read_empty_node_id_removes() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();
        let state = controller
            .create(&ctx, &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();

        factory.daemon.deactivate();

        let observation = controller
            .read(&ctx, &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap();
        assert!(matches!(observation, Observation::Removed));
    }

    #[tokio::test]
    async fn test_read_changed_node_id_is_drift_warning() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();
        let state = controller
            .create(&ctx, &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();

        factory
            .daemon
            .activate("node-9", "cluster-1", ("SWMTKN-1-m", "SWMTKN-1-w"));

        let observation = controller
            .read(&ctx, &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap();
        let warning = observation.warning().unwrap().to_string();
        assert!(warning.contains("node-1"));
        assert!(warning.contains("node-9"));
        assert!(observation.into_state().is_none());
        // no listing once drift is known
        assert!(!factory.daemon.calls().contains(&"node-list".to_string()));
    }

    #[tokio::test]
    async fn test_listing_failure_skips_correction() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();
        let state = controller
            .create(&ctx, &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();

        factory.daemon.set_nodes(None);

        let client = factory.daemon.clone();
        match ClusterMember
            .observe(&client, &config(WORKER_TOKEN), &state)
            .await
            .unwrap()
        {
            Observation::Present(identity) => {
                assert_eq!(identity.role.role, NodeRole::Worker);
                assert_eq!(identity.role.confidence, Confidence::Heuristic);
            }
            other => panic!("unexpected observation: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unlisted_node_keeps_role() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();
        let state = controller
            .create(&ctx, &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();

        factory.daemon.set_nodes(Some(vec![("node-0", NodeRole::Manager)]));

        let refreshed = controller
            .read(&ctx, &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap()
            .into_state();
        assert_eq!(refreshed, Some(state));
    }

    #[tokio::test]
    async fn test_read_is_idempotent_with_confirming_listing() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();
        let state = controller
            .create(&ctx, &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();

        factory
            .daemon
            .set_nodes(Some(vec![("node-0", NodeRole::Manager), ("node-1", NodeRole::Worker)]));

        let first = controller
            .read(&ctx, &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap()
            .into_state();
        let second = controller
            .read(&ctx, &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap()
            .into_state();
        assert_eq!(first, Some(state));
        assert_eq!(first, second);

        // reads only observe
        let calls = factory.daemon.calls();
        assert_eq!(
            &calls[calls.len() - 4..],
            ["daemon-info", "node-list", "daemon-info", "node-list"]
        );
    }

    #[tokio::test]
    async fn test_listing_beats_token_shape_on_read() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();
        let manager_token = format!("SWMTKN-1-{}-secret", "x".repeat(50));
        let state = controller
            .create(&ctx, &ClusterMember, &config(&manager_token))
            .await
            .unwrap();
        assert_eq!(state.node_role, NodeRole::Manager);

        factory.daemon.set_nodes(Some(vec![("node-1", NodeRole::Worker)]));

        let refreshed = controller
            .read(&ctx, &ClusterMember, &config(&manager_token), &state)
            .await
            .unwrap()
            .into_state()
            .unwrap();
        assert_eq!(refreshed.node_role, NodeRole::Worker);
    }

    #[tokio::test]
    async fn test_worker_join_without_cluster_id_still_records_membership() {
        let (factory, controller) = setup();
        factory.daemon.state.lock().unwrap().join_cluster_id = String::new();

        let state = controller
            .create(&OperationContext::new(), &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();
        assert_eq!(state.node_id, "node-1");
        assert_eq!(state.id, "node-1-");
        assert_eq!(state.node_role, NodeRole::Worker);

        // later reads keep the recorded ID
        let refreshed = controller
            .read(&OperationContext::new(), &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap()
            .into_state();
        assert_eq!(refreshed, Some(state));
    }

    #[tokio::test]
    async fn test_delete_prefers_clean_leave() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();
        let state = controller
            .create(&ctx, &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();

        controller
            .delete(&ctx, &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap();

        let calls = factory.daemon.calls();
        assert_eq!(calls.last().unwrap(), "cluster-leave(force=false)");
        assert!(!calls.contains(&"cluster-leave(force=true)".to_string()));
    }

    #[tokio::test]
    async fn test_delete_falls_back_to_forced_leave() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();
        let state = controller
            .create(&ctx, &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();

        factory
            .daemon
            .fail("cluster-leave(force=false)", "leaving would lose quorum");

        controller
            .delete(&ctx, &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap();

        let calls = factory.daemon.calls();
        let tail = &calls[calls.len() - 2..];
        assert_eq!(tail, ["cluster-leave(force=false)", "cluster-leave(force=true)"]);
    }

    #[tokio::test]
    async fn test_delete_fails_when_both_leaves_fail() {
        let (factory, controller) = setup();
        let ctx = OperationContext::new();
        let state = controller
            .create(&ctx, &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap();

        factory
            .daemon
            .fail("cluster-leave(force=false)", "leaving would lose quorum");
        factory
            .daemon
            .fail("cluster-leave(force=true)", "daemon is shutting down");

        let err = controller
            .delete(&ctx, &ClusterMember, &config(WORKER_TOKEN), &state)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("daemon is shutting down"));
    }

    #[tokio::test]
    async fn test_create_requires_remote_addrs() {
        let (factory, controller) = setup();
        let mut config = config(WORKER_TOKEN);
        config.remote_addrs.clear();

        let err = controller
            .create(&OperationContext::new(), &ClusterMember, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::InvalidResourceConfig(_)));
        assert!(factory.daemon.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_token() {
        let (_factory, controller) = setup();
        let err = controller
            .create(&OperationContext::new(), &ClusterMember, &config("  "))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("join_token"));
    }

    #[tokio::test]
    async fn test_join_error_never_leaks_token() {
        let (factory, controller) = setup();
        factory.daemon.fail(
            "cluster-join",
            "rpc error: invalid join token SWMTKN-1-short-secret",
        );

        let err = controller
            .create(&OperationContext::new(), &ClusterMember, &config(WORKER_TOKEN))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("invalid join token"));
        assert!(!message.contains(WORKER_TOKEN));
        assert!(!format!("{:?}", err).contains(WORKER_TOKEN));
    }

    #[test]
    fn test_join_request_defaults() {
        let mut config = config(WORKER_TOKEN);
        config.remote_addrs.insert(" ".to_string());
        let request = config.join_request();
        assert_eq!(request.listen_addr.as_deref(), Some(DEFAULT_LISTEN_ADDR));
        assert_eq!(request.remote_addrs, Some(vec!["10.0.0.4:2377".to_string()]));
        assert_eq!(request.advertise_addr.as_deref(), Some("10.0.0.7"));

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["JoinToken"], WORKER_TOKEN);
        assert_eq!(json["RemoteAddrs"][0], "10.0.0.4:2377");
    }

    #[test]
    fn test_config_debug_hides_token() {
        assert!(!format!("{:?}", config(WORKER_TOKEN)).contains(WORKER_TOKEN));
    }
}
