//! Contract with the mutable cluster the scaling checks operate on.
//!
//! Updates use optimistic concurrency: every object carries the resource
//! version it was read at, and an update against a stale version fails with
//! [`ClientError::Conflict`].

use async_trait::async_trait;
use std::fmt;

/// Kind, namespace and name of a cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        ResourceRef {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn deployment(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new("Deployment", namespace, name)
    }

    pub fn stateful_set(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new("StatefulSet", namespace, name)
    }

    pub fn autoscaler(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new("HorizontalPodAutoscaler", namespace, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Observed replica counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub ready: i32,
    pub available: i32,
    pub updated: i32,
    pub unavailable: i32,
}

/// A replicated workload (deployment, stateful set, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub target: ResourceRef,
    pub resource_version: String,
    /// Desired replica count
    pub replicas: i32,
    pub status: ReplicaStatus,
    /// Kinds of the objects owning this workload
    pub owner_kinds: Vec<String>,
}

impl Workload {
    /// All desired replicas are ready, available and up to date.
    pub fn is_ready(&self) -> bool {
        self.status.unavailable == 0
            && self.status.ready == self.replicas
            && self.status.available == self.replicas
            && self.status.updated == self.replicas
    }
}

/// Horizontal autoscaler bound to a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Autoscaler {
    pub target: ResourceRef,
    /// Workload scaled by this autoscaler
    pub scale_target: ResourceRef,
    pub resource_version: String,
    pub min_replicas: Option<i32>,
    pub max_replicas: i32,
}

impl Autoscaler {
    /// Lower bound; an unset minimum means 1.
    pub fn min_replicas(&self) -> i32 {
        self.min_replicas.unwrap_or(1)
    }
}

/// Errors returned by a [`ResourceClient`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("conflict updating {0}: the object has been modified")]
    Conflict(ResourceRef),

    #[error("{0} not found")]
    NotFound(ResourceRef),

    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    #[error("api error: {0}")]
    Api(String),
}

impl ClientError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }
}

/// Operations the scaling protocol needs from the cluster.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get_workload(&self, target: &ResourceRef) -> Result<Workload, ClientError>;

    /// Write `workload.replicas`. Fails with [`ClientError::Conflict`] when
    /// `workload.resource_version` is stale.
    async fn update_workload(&self, workload: &Workload) -> Result<Workload, ClientError>;

    async fn get_autoscaler(&self, target: &ResourceRef) -> Result<Autoscaler, ClientError>;

    /// Write the autoscaler bounds, with the same conflict rule as
    /// [`ResourceClient::update_workload`].
    async fn update_autoscaler(&self, autoscaler: &Autoscaler) -> Result<Autoscaler, ClientError>;

    /// Read the workload's current status for readiness polling.
    async fn observe_workload(&self, target: &ResourceRef) -> Result<Workload, ClientError> {
        self.get_workload(target).await
    }
}
