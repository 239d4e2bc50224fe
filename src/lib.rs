//! swarmctl - Docker Swarm membership as declarative resources
//!
//! Two resource kinds manage a node's place in a swarm:
//!
//! - `swarm_init` initializes a swarm on a daemon and owns it
//! - `swarm_join` joins a daemon to an existing swarm
//!
//! Each lifecycle verb resolves the declared connection, talks to the Docker
//! Engine API over a Unix socket, TCP (optionally TLS) or an SSH tunnel, and
//! projects what the daemon reports into persisted state.

pub mod client;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod swarm;

pub use error::{Result, SwarmError};
