//! In-memory daemon for lifecycle tests

use super::{ClientFactory, DaemonClient};
use bollard::models::{
    ClusterInfo, JoinTokens, Node, NodeSpec, NodeSpecRoleEnum, Swarm, SwarmInfo,
    SwarmInitRequest, SwarmJoinRequest, SystemInfo,
};
use crate::connection::ConnectionSpec;
use crate::error::{Result, SwarmError};
use crate::swarm::NodeRole;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Mutable daemon-side state shared by every client the factory hands out
#[derive(Debug, Default)]
pub struct DaemonState {
    pub info: SystemInfo,
    pub inspect: Swarm,
    /// `None` makes node-list fail, as on a worker
    pub nodes: Option<Vec<Node>>,
    /// Node ID handed out by the next init/join
    pub next_node_id: String,
    /// Cluster a join lands in; empty leaves `Swarm.Cluster` unset, as on a worker
    pub join_cluster_id: String,
    /// Pending failures as (call label, daemon message), consumed in order
    pub failures: Vec<(String, String)>,
    /// Call labels in the order they were issued
    pub calls: Vec<String>,
    /// Hosts clients were built for
    pub builds: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StubDaemon {
    pub state: Arc<Mutex<DaemonState>>,
}

impl StubDaemon {
    pub fn new() -> Self {
        let daemon = Self::default();
        {
            let mut state = daemon.state.lock().unwrap();
            state.next_node_id = "node-1".to_string();
            state.join_cluster_id = "cluster-1".to_string();
        }
        daemon
    }

    /// Put the daemon into an active swarm with the given node and cluster
    pub fn activate(&self, node_id: &str, cluster_id: &str, tokens: (&str, &str)) {
        let mut state = self.state.lock().unwrap();
        state.info.swarm = Some(swarm_info(node_id, cluster_id, None));
        state.inspect = Swarm {
            id: Some(cluster_id.to_string()),
            join_tokens: Some(JoinTokens {
                manager: Some(tokens.0.to_string()),
                worker: Some(tokens.1.to_string()),
            }),
            ..Default::default()
        };
    }

    /// Make the daemon forget its swarm, as after an out-of-band leave
    pub fn deactivate(&self) {
        let mut state = self.state.lock().unwrap();
        state.info.swarm = Some(SwarmInfo {
            node_id: Some(String::new()),
            ..Default::default()
        });
        state.inspect = Swarm::default();
    }

    pub fn set_nodes(&self, nodes: Option<Vec<(&str, NodeRole)>>) {
        self.state.lock().unwrap().nodes = nodes.map(|list| {
            list.into_iter()
                .map(|(id, role)| Node {
                    id: Some(id.to_string()),
                    spec: Some(NodeSpec {
                        role: Some(match role {
                            NodeRole::Manager => NodeSpecRoleEnum::MANAGER,
                            NodeRole::Worker => NodeSpecRoleEnum::WORKER,
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect()
        });
    }

    pub fn fail(&self, call: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((call.to_string(), message.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        if let Some(pos) = state.failures.iter().position(|(c, _)| c == call) {
            let (_, message) = state.failures.remove(pos);
            return Err(SwarmError::DaemonOperationFailed {
                call: "stub",
                host: "stub://daemon".to_string(),
                status: Some(503),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DaemonClient for StubDaemon {
    fn host(&self) -> &str {
        "stub://daemon"
    }

    async fn info(&self) -> Result<SystemInfo> {
        self.record("daemon-info")?;
        Ok(self.state.lock().unwrap().info.clone())
    }

    async fn cluster_init(&self, _request: &SwarmInitRequest) -> Result<String> {
        self.record("cluster-init")?;
        let node_id = self.state.lock().unwrap().next_node_id.clone();
        self.activate(
            &node_id,
            "cluster-1",
            ("SWMTKN-1-manager-token", "SWMTKN-1-worker-token"),
        );
        Ok(node_id)
    }

    async fn cluster_inspect(&self) -> Result<Swarm> {
        self.record("cluster-inspect")?;
        Ok(self.state.lock().unwrap().inspect.clone())
    }

    async fn cluster_join(&self, request: &SwarmJoinRequest) -> Result<()> {
        self.record("cluster-join")?;
        let (node_id, cluster_id) = {
            let state = self.state.lock().unwrap();
            (state.next_node_id.clone(), state.join_cluster_id.clone())
        };
        {
            let mut state = self.state.lock().unwrap();
            state.info.swarm = Some(swarm_info(
                &node_id,
                &cluster_id,
                request.advertise_addr.clone(),
            ));
        }
        Ok(())
    }

    async fn cluster_leave(&self, force: bool) -> Result<()> {
        self.record(&format!("cluster-leave(force={})", force))?;
        self.deactivate();
        Ok(())
    }

    async fn node_list(&self) -> Result<Vec<Node>> {
        self.record("node-list")?;
        self.state
            .lock()
            .unwrap()
            .nodes
            .clone()
            .ok_or_else(|| SwarmError::DaemonOperationFailed {
                call: "node-list",
                host: "stub://daemon".to_string(),
                status: Some(503),
                message: "This node is not a swarm manager.".to_string(),
            })
    }
}

fn swarm_info(node_id: &str, cluster_id: &str, node_addr: Option<String>) -> SwarmInfo {
    SwarmInfo {
        node_id: Some(node_id.to_string()),
        node_addr,
        control_available: Some(!cluster_id.is_empty()),
        cluster: (!cluster_id.is_empty()).then(|| ClusterInfo {
            id: Some(cluster_id.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Factory handing out clients bound to one shared [`StubDaemon`]
#[derive(Debug, Clone, Default)]
pub struct StubFactory {
    pub daemon: StubDaemon,
}

impl StubFactory {
    pub fn new() -> Self {
        Self {
            daemon: StubDaemon::new(),
        }
    }
}

impl ClientFactory for StubFactory {
    fn build(&self, spec: &ConnectionSpec) -> Result<Box<dyn DaemonClient>> {
        self.daemon
            .state
            .lock()
            .unwrap()
            .builds
            .push(spec.host.clone());
        Ok(Box::new(self.daemon.clone()))
    }
}
