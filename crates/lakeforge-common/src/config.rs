//! Stack configuration loaded from `lakeforge.yaml`.
//!
//! Everything except the cluster name has a default. Resource names that
//! depend on the cluster name (bucket, policy, queue) are derived by
//! [`StackConfig::resolve`] when left empty.
//!
//! ```yaml
//! cluster:
//!   name: analytics
//!   region: eu-west-1
//! execution:
//!   transport:
//!     mode: container
//!     name: lakeforge-toolbox
//!   satisfaction: pod_readiness
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Root configuration for one install target
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StackConfig {
    /// Managed cluster and its initial capacity
    pub cluster: ClusterConfig,
    /// Object storage, identity policy and storage class
    pub storage: StorageConfig,
    /// Autoscaling controller
    pub compute: ComputeConfig,
    /// Stateful platform services
    pub core_services: ReleaseGroupConfig,
    /// Streaming applications
    pub stream: ReleaseGroupConfig,
    /// Datalake applications
    pub datalake: ReleaseGroupConfig,
    /// Ingress controller and routes
    pub ingress: IngressConfig,
    /// Bounded waits
    pub timeouts: Timeouts,
    /// How external calls are executed and how satisfaction is judged
    pub execution: ExecutionConfig,
}

/// Managed cluster settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster name (required)
    pub name: String,
    /// Cloud region
    pub region: String,
    /// Kubernetes minor version
    pub kubernetes_version: String,
    /// Initial worker capacity created when the cluster has no nodes
    pub node_group: NodeGroupConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            region: "us-east-1".to_string(),
            kubernetes_version: "1.32".to_string(),
            node_group: NodeGroupConfig::default(),
        }
    }
}

/// Worker capacity settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeGroupConfig {
    /// Node group name
    pub name: String,
    /// Instance type for the initial nodes
    pub instance_type: String,
    /// Minimum size
    pub min_size: u32,
    /// Maximum size
    pub max_size: u32,
    /// Desired size at creation
    pub desired_size: u32,
}

impl Default for NodeGroupConfig {
    fn default() -> Self {
        Self {
            name: "system".to_string(),
            instance_type: "m6i.large".to_string(),
            min_size: 1,
            max_size: 3,
            desired_size: 2,
        }
    }
}

/// Object storage and storage-class settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket name, defaults to `<cluster>-datalake`
    pub bucket: String,
    /// Identity policy name, defaults to `<cluster>-datalake-access`
    pub policy_name: String,
    /// Default StorageClass applied to the cluster
    pub storage_class: String,
    /// Namespace of the storage provisioner
    pub provisioner_namespace: String,
    /// Service account of the storage provisioner
    pub provisioner_service_account: String,
    /// Label selector of the storage provisioner pods
    pub provisioner_selector: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            policy_name: String::new(),
            storage_class: "gp3".to_string(),
            provisioner_namespace: "kube-system".to_string(),
            provisioner_service_account: "ebs-csi-controller-sa".to_string(),
            provisioner_selector: "app=ebs-csi-controller".to_string(),
        }
    }
}

/// Autoscaling controller settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComputeConfig {
    /// Namespace of the autoscaler
    pub namespace: String,
    /// Autoscaler release
    pub release: ReleaseConfig,
    /// Interruption queue name, defaults to `<cluster>-interruption`
    pub interruption_queue: String,
    /// Name of the default node pool resource
    pub node_pool: String,
    /// Instance families allowed in the default node pool
    pub instance_families: Vec<String>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            namespace: "karpenter".to_string(),
            release: ReleaseConfig::new("karpenter", "oci://public.ecr.aws/karpenter/karpenter"),
            interruption_queue: String::new(),
            node_pool: "default".to_string(),
            instance_families: vec!["m6i".to_string(), "r6i".to_string()],
        }
    }
}

/// A set of releases installed into one namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReleaseGroupConfig {
    /// Target namespace
    pub namespace: String,
    /// Releases in installation order
    pub releases: Vec<ReleaseConfig>,
    /// Minimum number of deployed releases for the group to count as
    /// satisfied, `None` means all of them
    pub min_deployed: Option<usize>,
}

impl ReleaseGroupConfig {
    /// Default core services: at least 3 of 4 must be deployed
    pub fn core_services() -> Self {
        Self {
            namespace: "platform".to_string(),
            releases: vec![
                ReleaseConfig::new("postgresql", "oci://registry-1.docker.io/bitnamicharts/postgresql"),
                ReleaseConfig::new("kafka", "oci://registry-1.docker.io/bitnamicharts/kafka"),
                ReleaseConfig::new("redis", "oci://registry-1.docker.io/bitnamicharts/redis"),
                ReleaseConfig::new(
                    "schema-registry",
                    "oci://registry-1.docker.io/bitnamicharts/schema-registry",
                ),
            ],
            min_deployed: Some(3),
        }
    }

    /// Default streaming workloads
    pub fn stream() -> Self {
        Self {
            namespace: "streaming".to_string(),
            releases: vec![
                ReleaseConfig::new("flink-operator", "flink-operator-repo/flink-kubernetes-operator"),
                ReleaseConfig::new("stream-ingest", "lakeforge/stream-ingest"),
            ],
            min_deployed: None,
        }
    }

    /// Default datalake workloads
    pub fn datalake() -> Self {
        Self {
            namespace: "datalake".to_string(),
            releases: vec![
                ReleaseConfig::new("spark-operator", "spark-operator/spark-operator"),
                ReleaseConfig::new("hive-metastore", "lakeforge/hive-metastore"),
                ReleaseConfig::new("trino", "trino/trino"),
            ],
            min_deployed: None,
        }
    }

    /// Deployed count required for satisfaction
    pub fn required_deployed(&self) -> usize {
        self.min_deployed
            .unwrap_or(self.releases.len())
            .min(self.releases.len())
    }
}

/// One release to upgrade-install
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Release name
    pub name: String,
    /// Chart reference (repo/chart, OCI URL or local path)
    pub chart: String,
    /// Pinned chart version
    pub version: Option<String>,
    /// Values passed to the chart
    pub values: BTreeMap<String, serde_json::Value>,
    /// Label selector of the release's pods, defaults to the instance label
    pub pod_selector: Option<String>,
}

impl ReleaseConfig {
    /// Release with default values
    pub fn new(name: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chart: chart.into(),
            ..Default::default()
        }
    }

    /// Label selector for this release's pods
    pub fn selector(&self) -> String {
        self.pod_selector
            .clone()
            .unwrap_or_else(|| format!("app.kubernetes.io/instance={}", self.name))
    }
}

/// Ingress controller and routes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngressConfig {
    /// Namespace of the ingress controller
    pub namespace: String,
    /// Ingress controller release
    pub controller: ReleaseConfig,
    /// IngressClass name
    pub class_name: String,
    /// Routes exposed through the controller
    pub routes: Vec<IngressRoute>,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            namespace: "ingress".to_string(),
            controller: ReleaseConfig::new("ingress-nginx", "ingress-nginx/ingress-nginx"),
            class_name: "nginx".to_string(),
            routes: Vec::new(),
        }
    }
}

/// A single host → service route
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngressRoute {
    /// Ingress object name
    pub name: String,
    /// Namespace of the backing service
    pub namespace: String,
    /// Public host name
    pub host: String,
    /// Backing service name
    pub service: String,
    /// Backing service port
    pub port: u16,
}

/// Bounded waits, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// Interval between readiness samples
    pub poll_interval_secs: u64,
    /// Maximum wait for pods of a phase to become Ready
    pub pods_ready_secs: u64,
    /// Maximum wait for a newly created cluster's control plane
    pub cluster_ready_secs: u64,
    /// Maximum wait after a repair mutation
    pub repair_wait_secs: u64,
    /// Maximum wait for a locked release to be released
    pub lock_wait_secs: u64,
    /// Grace period after creating node capacity
    pub capacity_grace_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            pods_ready_secs: 600,
            cluster_ready_secs: 1800,
            repair_wait_secs: 300,
            lock_wait_secs: 180,
            capacity_grace_secs: 120,
        }
    }
}

impl Timeouts {
    /// Interval between readiness samples
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
    /// Maximum wait for pods to become Ready
    pub fn pods_ready(&self) -> Duration {
        Duration::from_secs(self.pods_ready_secs)
    }
    /// Maximum wait for the control plane
    pub fn cluster_ready(&self) -> Duration {
        Duration::from_secs(self.cluster_ready_secs)
    }
    /// Maximum wait after a repair
    pub fn repair_wait(&self) -> Duration {
        Duration::from_secs(self.repair_wait_secs)
    }
    /// Maximum wait on a locked release
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }
    /// Grace period after creating capacity
    pub fn capacity_grace(&self) -> Duration {
        Duration::from_secs(self.capacity_grace_secs)
    }
}

/// Execution-mode settings threaded through the install context
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Where external commands run
    pub transport: Transport,
    /// What "satisfied" means for release-backed phases
    pub satisfaction: SatisfactionPolicy,
}

/// Where external commands (helm, aws, eksctl) are executed
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Transport {
    /// Directly on the host
    #[default]
    Host,
    /// Inside a running toolbox container
    Container {
        /// Container name
        name: String,
        /// Container runtime binary
        #[serde(default = "default_runtime")]
        runtime: String,
    },
}

fn default_runtime() -> String {
    "docker".to_string()
}

impl Transport {
    /// Program and argument prefix used to run `program` through this transport
    pub fn wrap(&self, program: &str) -> (String, Vec<String>) {
        match self {
            Transport::Host => (program.to_string(), Vec::new()),
            Transport::Container { name, runtime } => (
                runtime.clone(),
                vec![
                    "exec".to_string(),
                    "-i".to_string(),
                    name.clone(),
                    program.to_string(),
                ],
            ),
        }
    }
}

/// Whether a `deployed` release is enough for a phase to count as satisfied
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SatisfactionPolicy {
    /// Release status `deployed` is sufficient
    #[default]
    ReleaseStatus,
    /// Release status `deployed` and every relevant pod Ready
    PodReadiness,
}

impl StackConfig {
    /// Parse YAML, derive defaults and validate
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: StackConfig = serde_yaml::from_str(yaml)?;
        config.resolve();
        config.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Fill empty derived fields and default release groups
    pub fn resolve(&mut self) {
        let cluster = self.cluster.name.clone();
        if self.storage.bucket.is_empty() {
            self.storage.bucket = format!("{}-datalake", cluster);
        }
        if self.storage.policy_name.is_empty() {
            self.storage.policy_name = format!("{}-datalake-access", cluster);
        }
        if self.compute.interruption_queue.is_empty() {
            self.compute.interruption_queue = format!("{}-interruption", cluster);
        }
        fill_group(&mut self.core_services, ReleaseGroupConfig::core_services());
        fill_group(&mut self.stream, ReleaseGroupConfig::stream());
        fill_group(&mut self.datalake, ReleaseGroupConfig::datalake());
    }

    /// Reject configurations that cannot be installed
    pub fn validate(&self) -> Result<()> {
        if self.cluster.name.trim().is_empty() {
            return Err(Error::config("cluster.name is required"));
        }
        if self.timeouts.poll_interval_secs == 0 {
            return Err(Error::config("timeouts.poll_interval_secs must be positive"));
        }
        let ng = &self.cluster.node_group;
        if ng.min_size > ng.max_size || ng.desired_size > ng.max_size {
            return Err(Error::config(format!(
                "cluster.node_group sizes are inconsistent (min {}, desired {}, max {})",
                ng.min_size, ng.desired_size, ng.max_size
            )));
        }
        for (field, release) in [
            ("compute.release", &self.compute.release),
            ("ingress.controller", &self.ingress.controller),
        ] {
            if release.name.trim().is_empty() || release.chart.trim().is_empty() {
                return Err(Error::config(format!("{} needs a name and a chart", field)));
            }
        }
        for (field, group) in [
            ("core_services", &self.core_services),
            ("stream", &self.stream),
            ("datalake", &self.datalake),
        ] {
            if let Some(release) = group.releases.iter().find(|r| r.name.is_empty() || r.chart.is_empty()) {
                return Err(Error::config(format!(
                    "{}: release entries need a name and a chart (got name '{}')",
                    field, release.name
                )));
            }
        }
        Ok(())
    }
}

fn fill_group(group: &mut ReleaseGroupConfig, default: ReleaseGroupConfig) {
    if group.namespace.is_empty() {
        group.namespace = default.namespace;
    }
    if group.releases.is_empty() {
        group.releases = default.releases;
        if group.min_deployed.is_none() {
            group.min_deployed = default.min_deployed;
        }
    }
}
