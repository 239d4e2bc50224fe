//! Resource lifecycle: create, read, update and delete
//!
//! Both resource kinds run over the same substrate: every verb resolves the
//! declared [`NodeConnection`], builds a fresh client, issues its daemon calls
//! sequentially and projects the result. Nothing is pooled or retried between
//! invocations; the caller re-invokes a verb to retry.

pub mod member;
pub mod owner;

pub use member::{ClusterMember, MemberConfig, MemberState};
pub use owner::{ClusterOwner, OwnerConfig, OwnerState};

use crate::client::{ClientFactory, DaemonClient, DockerClientFactory};
use crate::connection::{self, NodeConnection};
use crate::error::{Result, SwarmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info_span, warn, Instrument};

/// The two resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Initializes a swarm and owns it
    #[serde(rename = "swarm_init")]
    ClusterOwner,
    /// Joins a node to an existing swarm
    #[serde(rename = "swarm_join")]
    ClusterMember,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ClusterOwner => "swarm_init",
            ResourceKind::ClusterMember => "swarm_join",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Read => "read",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }
}

/// Result of refreshing a resource against the live daemon
#[derive(Debug)]
pub enum Observation<T> {
    /// Still there; carries the refreshed state
    Present(T),
    /// Gone out-of-band; clear state without error
    Removed,
    /// No longer the same resource; clear state and warn
    Drifted(SwarmError),
}

impl<T> Observation<T> {
    /// State to persist after the read
    pub fn into_state(self) -> Option<T> {
        match self {
            Observation::Present(state) => Some(state),
            Observation::Removed | Observation::Drifted(_) => None,
        }
    }

    /// Warning to surface to the caller, if any
    pub fn warning(&self) -> Option<&SwarmError> {
        match self {
            Observation::Drifted(warning) => Some(warning),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Observation<U> {
        match self {
            Observation::Present(state) => Observation::Present(f(state)),
            Observation::Removed => Observation::Removed,
            Observation::Drifted(warning) => Observation::Drifted(warning),
        }
    }
}

/// Caller-supplied invocation context
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationContext {
    deadline: Option<Instant>,
}

impl OperationContext {
    /// No deadline; the call runs until the daemon answers or the future is dropped
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run `fut`, aborting it at the deadline
    pub async fn run<T>(
        &self,
        kind: ResourceKind,
        verb: Verb,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| SwarmError::DeadlineExceeded {
                    kind: kind.as_str(),
                    verb: verb.as_str(),
                })?,
            None => fut.await,
        }
    }
}

/// Daemon-facing behaviour of one resource kind
#[async_trait]
pub trait SwarmResource: Send + Sync {
    /// Declared configuration
    type Desired: Send + Sync;
    /// Persisted observed state
    type Observed: Send + Sync;

    const KIND: ResourceKind;

    /// Connection declared by the resource
    fn node(desired: &Self::Desired) -> &NodeConnection;

    async fn create(
        &self,
        client: &dyn DaemonClient,
        desired: &Self::Desired,
    ) -> Result<Self::Observed>;

    async fn read(
        &self,
        client: &dyn DaemonClient,
        desired: &Self::Desired,
        observed: &Self::Observed,
    ) -> Result<Observation<Self::Observed>>;

    async fn delete(&self, client: &dyn DaemonClient, observed: &Self::Observed) -> Result<()>;
}

/// Runs lifecycle verbs for any [`SwarmResource`]
#[derive(Debug, Clone, Default)]
pub struct LifecycleController<F = DockerClientFactory> {
    factory: F,
}

impl<F: ClientFactory> LifecycleController<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Absent → present
    pub async fn create<R: SwarmResource>(
        &self,
        ctx: &OperationContext,
        resource: &R,
        desired: &R::Desired,
    ) -> Result<R::Observed> {
        let node = R::node(desired);
        async {
            let client = self.open(node)?;
            ctx.run(R::KIND, Verb::Create, resource.create(client.as_ref(), desired))
                .await
        }
        .instrument(span(R::KIND, Verb::Create, node))
        .await
    }

    /// Refresh persisted state from the daemon
    pub async fn read<R: SwarmResource>(
        &self,
        ctx: &OperationContext,
        resource: &R,
        desired: &R::Desired,
        observed: &R::Observed,
    ) -> Result<Observation<R::Observed>> {
        let node = R::node(desired);
        async {
            let client = self.open(node)?;
            ctx.run(
                R::KIND,
                Verb::Read,
                resource.read(client.as_ref(), desired, observed),
            )
            .await
        }
        .instrument(span(R::KIND, Verb::Read, node))
        .await
    }

    /// Always rejected: swarm parameters are not mutable in place
    pub async fn update<R: SwarmResource>(
        &self,
        _ctx: &OperationContext,
        _resource: &R,
        _desired: &R::Desired,
        _observed: &R::Observed,
    ) -> Result<R::Observed> {
        warn!("Rejecting update of {}", R::KIND);
        Err(SwarmError::UnsupportedOperation {
            kind: R::KIND.as_str(),
        })
    }

    /// Present → absent; on error the caller keeps its state for a retry
    pub async fn delete<R: SwarmResource>(
        &self,
        ctx: &OperationContext,
        resource: &R,
        desired: &R::Desired,
        observed: &R::Observed,
    ) -> Result<()> {
        let node = R::node(desired);
        async {
            let client = self.open(node)?;
            ctx.run(R::KIND, Verb::Delete, resource.delete(client.as_ref(), observed))
                .await
        }
        .instrument(span(R::KIND, Verb::Delete, node))
        .await
    }

    fn open(&self, node: &NodeConnection) -> Result<Box<dyn DaemonClient>> {
        let spec = connection::resolve(node)?;
        self.factory.build(&spec)
    }
}

fn span(kind: ResourceKind, verb: Verb, node: &NodeConnection) -> tracing::Span {
    let host = if node.host.trim().is_empty() {
        connection::DEFAULT_HOST
    } else {
        node.host.trim()
    };
    info_span!("lifecycle", kind = kind.as_str(), verb = verb.as_str(), host = host)
}
