//! Cluster and membership identities

use super::node::RoleAssessment;
use bollard::models::{Swarm, SystemInfo};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A secret string that never shows up in logs or error messages
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Sensitive(String);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret itself, for the daemon call that needs it
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remove any occurrence of the secret from `message`
    pub fn scrub(&self, message: &str) -> String {
        if self.0.is_empty() {
            message.to_string()
        } else {
            message.replace(&self.0, "<redacted>")
        }
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl fmt::Display for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl Serialize for Sensitive {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Sensitive {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Sensitive)
    }
}

/// Identity of a swarm created by the cluster owner resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub cluster_id: String,
    pub manager_join_token: Sensitive,
    pub worker_join_token: Sensitive,
}

impl ClusterIdentity {
    /// Identity from a live inspect; `None` when the swarm is not active
    pub fn from_inspect(inspect: Swarm) -> Option<Self> {
        let cluster_id = inspect.id.filter(|id| !id.is_empty())?;
        let tokens = inspect.join_tokens.unwrap_or_default();
        Some(Self {
            cluster_id,
            manager_join_token: Sensitive::new(tokens.manager.unwrap_or_default()),
            worker_join_token: Sensitive::new(tokens.worker.unwrap_or_default()),
        })
    }
}

/// What a daemon's `/info` reports about its own swarm membership.
///
/// Both IDs are empty on a daemon outside any swarm. Workers report a node ID
/// but no cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSwarm {
    pub node_id: String,
    pub cluster_id: String,
}

impl From<SystemInfo> for LocalSwarm {
    fn from(info: SystemInfo) -> Self {
        let swarm = info.swarm.unwrap_or_default();
        Self {
            node_id: swarm.node_id.unwrap_or_default(),
            cluster_id: swarm.cluster.and_then(|c| c.id).unwrap_or_default(),
        }
    }
}

/// Identity of one node's membership in a swarm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberIdentity {
    pub node_id: String,
    pub role: RoleAssessment,
    pub composite_id: String,
}

impl MemberIdentity {
    pub fn new(node_id: &str, cluster_id: &str, role: RoleAssessment) -> Self {
        Self {
            node_id: node_id.to_string(),
            role,
            composite_id: composite_id(node_id, cluster_id),
        }
    }
}

/// Stable resource identifier for a membership
pub fn composite_id(node_id: &str, cluster_id: &str) -> String {
    format!("{}-{}", node_id, cluster_id)
}
