//! Collaborator contracts consumed by the engine.
//!
//! The engine assumes nothing beyond these traits. Absence is never an error:
//! `ClusterFacts::get` answers `exists = false`, `head_resource` answers
//! `false`. An `Err` always means the backend could not be queried at all.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lakeforge_common::{Error, ReleaseConfig};

/// Cluster resource kinds the engine observes or applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// core/v1 Node
    Node,
    /// core/v1 Pod
    Pod,
    /// apps/v1 Deployment
    Deployment,
    /// storage.k8s.io/v1 StorageClass
    StorageClass,
    /// networking.k8s.io/v1 Ingress
    Ingress,
    /// karpenter.sh/v1 NodePool
    NodePool,
    /// karpenter.k8s.aws/v1 EC2NodeClass
    NodeClass,
}

impl ResourceKind {
    /// `apiVersion` of the kind
    pub fn api_version(self) -> &'static str {
        match self {
            ResourceKind::Node | ResourceKind::Pod => "v1",
            ResourceKind::Deployment => "apps/v1",
            ResourceKind::StorageClass => "storage.k8s.io/v1",
            ResourceKind::Ingress => "networking.k8s.io/v1",
            ResourceKind::NodePool => "karpenter.sh/v1",
            ResourceKind::NodeClass => "karpenter.k8s.aws/v1",
        }
    }

    /// `kind` of the resource
    pub fn kind(self) -> &'static str {
        match self {
            ResourceKind::Node => "Node",
            ResourceKind::Pod => "Pod",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StorageClass => "StorageClass",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::NodePool => "NodePool",
            ResourceKind::NodeClass => "EC2NodeClass",
        }
    }

    /// Plural resource name used in API paths
    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Node => "nodes",
            ResourceKind::Pod => "pods",
            ResourceKind::Deployment => "deployments",
            ResourceKind::StorageClass => "storageclasses",
            ResourceKind::Ingress => "ingresses",
            ResourceKind::NodePool => "nodepools",
            ResourceKind::NodeClass => "ec2nodeclasses",
        }
    }

    /// Whether objects of this kind live in a namespace
    pub fn namespaced(self) -> bool {
        matches!(
            self,
            ResourceKind::Pod | ResourceKind::Deployment | ResourceKind::Ingress
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Reference to a single cluster object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Kind of the object
    pub kind: ResourceKind,
    /// Object name
    pub name: String,
    /// Namespace for namespaced kinds
    pub namespace: Option<String>,
}

impl ObjectRef {
    /// Cluster-scoped object
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
        }
    }

    /// Namespaced object
    pub fn namespaced(kind: ResourceKind, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: Some(namespace.to_string()),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// List query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Kind to list
    pub kind: ResourceKind,
    /// Label selector (`k=v,k2=v2`)
    pub selector: Option<String>,
    /// Namespace, `None` for cluster-scoped kinds or all namespaces
    pub namespace: Option<String>,
}

impl ListQuery {
    /// List every object of a kind
    pub fn all(kind: ResourceKind) -> Self {
        Self {
            kind,
            selector: None,
            namespace: None,
        }
    }

    /// List objects in a namespace
    pub fn in_namespace(kind: ResourceKind, namespace: &str) -> Self {
        Self {
            kind,
            selector: None,
            namespace: Some(namespace.to_string()),
        }
    }

    /// Restrict to a label selector
    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

/// Result of a point lookup
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// Whether the object exists
    pub exists: bool,
    /// The object as JSON when it exists
    pub payload: Option<Value>,
}

impl Lookup {
    /// Object not found
    pub fn absent() -> Self {
        Self {
            exists: false,
            payload: None,
        }
    }

    /// Object found
    pub fn found(payload: Value) -> Self {
        Self {
            exists: true,
            payload: Some(payload),
        }
    }
}

/// Filter for recent events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Keep only events whose involved object has one of these names
    pub involved_names: Vec<String>,
    /// Maximum number of events returned, newest first
    pub limit: usize,
}

/// A cluster event reduced to what diagnostics need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Kind of the involved object
    pub involved_kind: String,
    /// Name of the involved object
    pub involved_name: String,
    /// Event reason (e.g. `FailedScheduling`)
    pub reason: String,
    /// Event message
    pub message: String,
    /// Normal or Warning
    pub event_type: String,
}

/// A cluster manifest to upsert
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Kind of the object
    pub kind: ResourceKind,
    /// Namespace for namespaced kinds
    pub namespace: Option<String>,
    /// Full object body, including apiVersion/kind/metadata.name
    pub body: Value,
}

impl Manifest {
    /// Name taken from `metadata.name`
    pub fn name(&self) -> &str {
        self.body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Binding of a service account to an identity policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAssociation {
    /// Service account namespace
    pub namespace: String,
    /// Service account name
    pub service_account: String,
    /// Policy granted to the service account
    pub policy_arn: String,
}

/// Release status as reported by the release manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ReleaseStatus {
    /// Successfully deployed
    Deployed,
    /// Last operation failed
    Failed,
    /// Install in progress
    PendingInstall,
    /// Upgrade in progress
    PendingUpgrade,
    /// Rollback in progress
    PendingRollback,
    /// Uninstall in progress
    Uninstalling,
    /// Replaced by a newer revision
    Superseded,
    /// Uninstalled but history kept
    Uninstalled,
    /// Anything else
    Unknown(String),
}

impl ReleaseStatus {
    /// Failure state that warrants a repair
    pub fn is_failure(&self) -> bool {
        matches!(self, ReleaseStatus::Failed)
    }

    /// Another operation is in flight
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ReleaseStatus::PendingInstall
                | ReleaseStatus::PendingUpgrade
                | ReleaseStatus::PendingRollback
                | ReleaseStatus::Uninstalling
        )
    }

    /// Stable lowercase name (matches helm's spelling)
    pub fn as_str(&self) -> &str {
        match self {
            ReleaseStatus::Deployed => "deployed",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::PendingInstall => "pending-install",
            ReleaseStatus::PendingUpgrade => "pending-upgrade",
            ReleaseStatus::PendingRollback => "pending-rollback",
            ReleaseStatus::Uninstalling => "uninstalling",
            ReleaseStatus::Superseded => "superseded",
            ReleaseStatus::Uninstalled => "uninstalled",
            ReleaseStatus::Unknown(s) => s,
        }
    }
}

impl From<String> for ReleaseStatus {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "deployed" => ReleaseStatus::Deployed,
            "failed" => ReleaseStatus::Failed,
            "pending-install" => ReleaseStatus::PendingInstall,
            "pending-upgrade" => ReleaseStatus::PendingUpgrade,
            "pending-rollback" => ReleaseStatus::PendingRollback,
            "uninstalling" => ReleaseStatus::Uninstalling,
            "superseded" => ReleaseStatus::Superseded,
            "uninstalled" => ReleaseStatus::Uninstalled,
            _ => ReleaseStatus::Unknown(s),
        }
    }
}

impl From<ReleaseStatus> for String {
    fn from(s: ReleaseStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A release found in a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release name
    pub name: String,
    /// Current status
    pub status: ReleaseStatus,
    /// Current revision
    pub revision: u32,
}

/// Desired release for an upgrade-install
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseSpec {
    /// Release name
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Chart reference
    pub chart: String,
    /// Pinned chart version
    pub version: Option<String>,
    /// Chart values
    pub values: BTreeMap<String, Value>,
    /// Label selector of the release's pods
    pub selector: String,
}

impl ReleaseSpec {
    /// Spec for a configured release in `namespace`
    pub fn from_config(config: &ReleaseConfig, namespace: &str) -> Self {
        Self {
            name: config.name.clone(),
            namespace: namespace.to_string(),
            chart: config.chart.clone(),
            version: config.version.clone(),
            values: config.values.clone(),
            selector: config.selector(),
        }
    }

    /// Override or add a chart value
    pub fn value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Manual recovery command for a release stuck in another operation
    pub fn recovery_command(&self) -> String {
        format!("helm rollback {} -n {}", self.name, self.namespace)
    }
}

/// Cloud-side resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudResource {
    /// Managed Kubernetes cluster (control plane only)
    Cluster {
        /// Cluster name
        name: String,
        /// Region
        region: String,
        /// Kubernetes version
        version: String,
    },
    /// Worker node group of a cluster
    NodeGroup {
        /// Owning cluster
        cluster: String,
        /// Group name
        name: String,
        /// Region
        region: String,
        /// Instance type
        instance_type: String,
        /// Minimum size
        min_size: u32,
        /// Maximum size
        max_size: u32,
        /// Desired size
        desired_size: u32,
    },
    /// Object storage bucket
    Bucket {
        /// Bucket name
        name: String,
        /// Region
        region: String,
    },
    /// Message queue
    Queue {
        /// Queue name
        name: String,
        /// Region
        region: String,
    },
    /// Identity policy (existence checks only; creation goes through `create_policy`)
    Policy {
        /// Policy name
        name: String,
    },
}

impl CloudResource {
    /// Resource family name
    pub fn kind(&self) -> &'static str {
        match self {
            CloudResource::Cluster { .. } => "cluster",
            CloudResource::NodeGroup { .. } => "nodegroup",
            CloudResource::Bucket { .. } => "bucket",
            CloudResource::Queue { .. } => "queue",
            CloudResource::Policy { .. } => "policy",
        }
    }

    /// Resource name
    pub fn name(&self) -> &str {
        match self {
            CloudResource::Cluster { name, .. }
            | CloudResource::NodeGroup { name, .. }
            | CloudResource::Bucket { name, .. }
            | CloudResource::Queue { name, .. }
            | CloudResource::Policy { name } => name,
        }
    }
}

impl fmt::Display for CloudResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

/// Result of an idempotent policy creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRef {
    /// Policy identifier
    pub arn: String,
    /// Whether the policy already existed
    pub existed: bool,
}

/// Read-only cluster queries
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterFacts: Send + Sync {
    /// Look up one object; a missing object is `Lookup::absent()`
    async fn get(&self, target: &ObjectRef) -> Result<Lookup, Error>;

    /// List objects matching a query
    async fn list(&self, query: &ListQuery) -> Result<Vec<Value>, Error>;

    /// Recent events in a namespace, newest first
    async fn recent_events(
        &self,
        namespace: &str,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>, Error>;
}

/// Idempotent cluster mutations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MutationClient: Send + Sync {
    /// Upsert a manifest
    async fn apply(&self, manifest: &Manifest) -> Result<(), Error>;

    /// Bind a service account to a policy; succeeds if the binding exists
    async fn create_association(&self, association: &IdentityAssociation) -> Result<(), Error>;
}

/// Release management
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseManager: Send + Sync {
    /// Releases in a namespace, including failed and pending ones
    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>, Error>;

    /// Install or upgrade a release to the given spec
    async fn upgrade_install(&self, spec: &ReleaseSpec) -> Result<(), Error>;

    /// Whether another operation currently holds the release
    async fn is_locked(&self, name: &str, namespace: &str) -> Result<bool, Error>;
}

/// Cloud provisioning
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Create a resource; succeeds if it already exists
    async fn create_resource(&self, resource: &CloudResource) -> Result<(), Error>;

    /// Whether a resource exists
    async fn head_resource(&self, resource: &CloudResource) -> Result<bool, Error>;

    /// Create a policy if absent and return its identifier
    async fn create_policy(&self, name: &str, document: &Value) -> Result<PolicyRef, Error>;
}
