//! Desired-state manifests and persisted observed state
//!
//! A manifest declares one resource. The state file records what the last
//! successful operation observed; no file means the resource is absent.

use crate::connection::NodeConnection;
use crate::error::{Result, SwarmError};
use crate::lifecycle::{MemberConfig, OwnerConfig, ResourceKind};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use tracing::debug;

/// State files carry join tokens; only the owner may read them
const STATE_FILE_MODE: u32 = 0o600;

/// One declared resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    #[serde(rename = "swarm_init")]
    Owner(OwnerConfig),
    #[serde(rename = "swarm_join")]
    Member(MemberConfig),
}

impl Manifest {
    /// Load a manifest; `.json` files are read as JSON, anything else as YAML
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manifest = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => Self::parse_str(&content)?,
        };
        debug!("Loaded manifest {}", path.display());
        Ok(manifest)
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Manifest::Owner(_) => ResourceKind::ClusterOwner,
            Manifest::Member(_) => ResourceKind::ClusterMember,
        }
    }

    pub fn node(&self) -> &NodeConnection {
        match self {
            Manifest::Owner(config) => &config.node,
            Manifest::Member(config) => &config.node,
        }
    }

    /// Fill an empty `node.host` from the caller's default
    pub fn apply_default_host(&mut self, host: Option<&str>) {
        let node = match self {
            Manifest::Owner(config) => &mut config.node,
            Manifest::Member(config) => &mut config.node,
        };
        if let Some(host) = host.map(str::trim).filter(|h| !h.is_empty()) {
            if node.host.trim().is_empty() {
                node.host = host.to_string();
            }
        }
    }
}

/// Observed state as persisted between invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub kind: ResourceKind,
    pub updated_at: DateTime<Utc>,
    pub state: serde_json::Value,
}

impl StateFile {
    /// Snapshot `state` as observed now
    pub fn new(kind: ResourceKind, state: &impl Serialize) -> Result<Self> {
        Ok(Self {
            kind,
            updated_at: Utc::now(),
            state: serde_json::to_value(state)?,
        })
    }

    /// Typed state, checked against the kind the caller expects
    pub fn decode<T: DeserializeOwned>(&self, expected: ResourceKind) -> Result<T> {
        if self.kind != expected {
            return Err(SwarmError::InvalidResourceConfig(format!(
                "state file holds a {} resource, manifest declares {}",
                self.kind, expected
            )));
        }
        Ok(serde_json::from_value(self.state.clone())?)
    }

    /// Read a state file; `None` when the resource has no recorded state
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(STATE_FILE_MODE)
            .open(path)?;
        // the mode above only applies to newly created files
        file.set_permissions(Permissions::from_mode(STATE_FILE_MODE))?;
        file.write_all(content.as_bytes())?;
        debug!("Wrote state file {}", path.display());
        Ok(())
    }

    /// Forget the recorded state; a missing file is already forgotten
    pub fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
