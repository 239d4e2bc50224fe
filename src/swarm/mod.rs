//! Docker Swarm membership model
//!
//! Node roles, role inference and the identities the lifecycle resources
//! project into observed state.

pub mod cluster;
pub mod node;

pub use cluster::{composite_id, ClusterIdentity, LocalSwarm, MemberIdentity, Sensitive};
pub use node::{infer_role, Confidence, NodeRole, NodeSummary, RoleAssessment};
