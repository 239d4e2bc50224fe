//! Swarm node roles and role inference
//!
//! A node's role is known for certain only from a manager's node listing.
//! Right after a join no such listing may be reachable (workers cannot list
//! nodes), so the role is first guessed from the join token's shape and later
//! corrected whenever a listing is available.

use bollard::models::{Node, NodeSpecRoleEnum};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every swarm join token
pub const TOKEN_PREFIX: &str = "SWMTKN-1-";

/// Third-segment length above which a token is guessed to be a manager token.
///
/// Best effort only: the Engine API documents no such guarantee about the
/// token format, so a confirmed listing always wins.
pub const MANAGER_SEGMENT_THRESHOLD: usize = 30;

/// Node role in the swarm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Worker node
    #[default]
    Worker,
    /// Manager node
    Manager,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Worker => "worker",
            NodeRole::Manager => "manager",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a role classification was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Guessed from the join token's shape
    Heuristic,
    /// Reported by the daemon's node listing
    Confirmed,
}

/// Role classification together with its provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleAssessment {
    pub role: NodeRole,
    pub confidence: Confidence,
}

impl RoleAssessment {
    /// Provisional classification from a join token
    pub fn from_token(join_token: &str) -> Self {
        let role = match join_token.strip_prefix(TOKEN_PREFIX) {
            Some(rest) => {
                let segment = rest.split('-').next().unwrap_or_default();
                if segment.len() > MANAGER_SEGMENT_THRESHOLD {
                    NodeRole::Manager
                } else {
                    NodeRole::Worker
                }
            }
            None => NodeRole::Worker,
        };

        Self {
            role,
            confidence: Confidence::Heuristic,
        }
    }

    /// A previously persisted role whose provenance is no longer known
    pub fn carried(role: NodeRole) -> Self {
        Self {
            role,
            confidence: Confidence::Heuristic,
        }
    }

    /// Override with the daemon-reported role if `node_id` is listed.
    ///
    /// An unlisted node keeps its prior classification; removal is decided
    /// elsewhere.
    pub fn corrected(self, node_id: &str, listing: &[NodeSummary]) -> Self {
        match listing.iter().find(|n| n.id == node_id) {
            Some(node) => Self {
                role: node.role,
                confidence: Confidence::Confirmed,
            },
            None => self,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confidence == Confidence::Confirmed
    }
}

/// One entry of a node listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub id: String,
    pub role: NodeRole,
}

impl From<Node> for NodeSummary {
    fn from(node: Node) -> Self {
        let role = match node.spec.and_then(|spec| spec.role) {
            Some(NodeSpecRoleEnum::MANAGER) => NodeRole::Manager,
            _ => NodeRole::Worker,
        };
        Self {
            id: node.id.unwrap_or_default(),
            role,
        }
    }
}

/// Classify a node from its join token, then correct from a listing when one is at hand.
///
/// Only a listing that names `observed_node_id` yields a `Confirmed` role.
pub fn infer_role(
    join_token: &str,
    observed_node_id: &str,
    listing: Option<&[NodeSummary]>,
) -> RoleAssessment {
    let provisional = RoleAssessment::from_token(join_token);
    match listing {
        Some(nodes) => provisional.corrected(observed_node_id, nodes),
        None => provisional,
    }
}
