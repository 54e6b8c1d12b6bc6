//! In-memory cluster, release manager and cloud used by the engine tests.
//!
//! One `FakeCluster` implements every client trait over shared state, so a
//! mutation made through one trait is visible to the others (creating a node
//! group adds Ready nodes, a deployed release gets Ready pods). Every
//! mutating call is appended to a log that tests use as a spy.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, Node, NodeCondition, NodeStatus, Pod,
    PodCondition, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use lakeforge_common::{Error, SatisfactionPolicy, StackConfig, CORE_DNS_DEPLOYMENT, KUBE_SYSTEM_NAMESPACE};

use crate::clients::{
    ClusterFacts, CloudResource, EventFilter, EventRecord, IdentityAssociation, ListQuery, Lookup,
    Manifest, MutationClient, ObjectRef, PolicyRef, ProvisioningClient, Release, ReleaseManager,
    ReleaseSpec, ReleaseStatus, ResourceKind,
};
use crate::context::InstallContext;
use crate::model::Phase;

/// Marker label tying fake pods to the release that produced them
const RELEASE_LABEL: &str = "lakeforge.test/release";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PodShape {
    Ready,
    Starting,
    CrashLooping,
}

#[derive(Debug, Clone)]
struct FakePod {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    shape: PodShape,
}

impl FakePod {
    fn render(&self) -> Value {
        let ready = self.shape == PodShape::Ready;
        let waiting = match self.shape {
            PodShape::Ready => None,
            PodShape::Starting => Some(("ContainerCreating", None)),
            PodShape::CrashLooping => Some((
                "CrashLoopBackOff",
                Some("back-off 5m0s restarting failed container".to_string()),
            )),
        };
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(if ready { "Running" } else { "Pending" }.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                container_statuses: waiting.map(|(reason, message)| {
                    vec![ContainerStatus {
                        name: "main".to_string(),
                        state: Some(ContainerState {
                            waiting: Some(ContainerStateWaiting {
                                reason: Some(reason.to_string()),
                                message,
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        serde_json::to_value(pod).unwrap()
    }

    fn matches(&self, selector: Option<&str>) -> bool {
        let Some(selector) = selector else {
            return true;
        };
        selector
            .split(',')
            .filter(|term| !term.is_empty())
            .all(|term| match term.split_once('=') {
                Some((k, v)) => self.labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
                None => self.labels.contains_key(term.trim()),
            })
    }
}

fn parse_selector(selector: &str) -> BTreeMap<String, String> {
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn node_value(name: &str, ready: bool) -> Value {
    let node = Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    serde_json::to_value(node).unwrap()
}

fn dns_value(available: i32) -> Value {
    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(CORE_DNS_DEPLOYMENT.to_string()),
            namespace: Some(KUBE_SYSTEM_NAMESPACE.to_string()),
            ..Default::default()
        },
        status: Some(DeploymentStatus {
            available_replicas: Some(available),
            ..Default::default()
        }),
        ..Default::default()
    };
    serde_json::to_value(deployment).unwrap()
}

type ObjectKey = (ResourceKind, Option<String>, String);

#[derive(Debug)]
struct FakeState {
    reachable: bool,
    cloud: BTreeSet<(String, String)>,
    nodes: Vec<Value>,
    objects: BTreeMap<ObjectKey, Value>,
    pods: Vec<FakePod>,
    events: Vec<(String, EventRecord)>,
    releases: BTreeMap<(String, String), Release>,
    upgrade_results: BTreeMap<String, ReleaseStatus>,
    failing_upgrades: BTreeSet<String>,
    locked: BTreeSet<String>,
    unready_namespaces: BTreeSet<String>,
    capacity_ready: bool,
    provisioner_failure: Option<String>,
    mutations: Vec<String>,
    fact_queries: usize,
}

impl FakeState {
    fn new() -> Self {
        Self {
            reachable: false,
            cloud: BTreeSet::new(),
            nodes: Vec::new(),
            objects: BTreeMap::new(),
            pods: Vec::new(),
            events: Vec::new(),
            releases: BTreeMap::new(),
            upgrade_results: BTreeMap::new(),
            failing_upgrades: BTreeSet::new(),
            locked: BTreeSet::new(),
            unready_namespaces: BTreeSet::new(),
            capacity_ready: true,
            provisioner_failure: None,
            mutations: Vec::new(),
            fact_queries: 0,
        }
    }

    fn set_dns(&mut self, available: i32) {
        self.objects.insert(
            (
                ResourceKind::Deployment,
                Some(KUBE_SYSTEM_NAMESPACE.to_string()),
                CORE_DNS_DEPLOYMENT.to_string(),
            ),
            dns_value(available),
        );
    }

    fn add_provisioner_pod(&mut self, selector: &str, namespace: &str) {
        self.pods.retain(|p| !(p.namespace == namespace && p.name == "ebs-csi-controller-0"));
        self.pods.push(FakePod {
            name: "ebs-csi-controller-0".to_string(),
            namespace: namespace.to_string(),
            labels: parse_selector(selector),
            shape: PodShape::Ready,
        });
    }

    fn sync_release_pods(&mut self, namespace: &str, name: &str, selector: &str, status: &ReleaseStatus) {
        self.pods.retain(|p| {
            !(p.namespace == namespace && p.labels.get(RELEASE_LABEL).map(String::as_str) == Some(name))
        });
        let shape = match status {
            ReleaseStatus::Deployed if self.unready_namespaces.contains(namespace) => PodShape::Starting,
            ReleaseStatus::Deployed => PodShape::Ready,
            ReleaseStatus::Failed => PodShape::CrashLooping,
            _ => return,
        };
        let mut labels = parse_selector(selector);
        labels.insert(RELEASE_LABEL.to_string(), name.to_string());
        self.pods.push(FakePod {
            name: format!("{}-0", name),
            namespace: namespace.to_string(),
            labels,
            shape,
        });
    }
}

/// Shared-state fake of every collaborator
#[derive(Clone)]
pub struct FakeCluster {
    config: Arc<StackConfig>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    /// Configuration used by most tests: cluster `analytics`, all defaults
    pub fn default_config() -> StackConfig {
        StackConfig::from_yaml("cluster:\n  name: analytics\n").unwrap()
    }

    /// Default configuration with a given satisfaction policy
    pub fn config_with_policy(policy: SatisfactionPolicy) -> StackConfig {
        let mut config = Self::default_config();
        config.execution.satisfaction = policy;
        config
    }

    /// Nothing exists yet
    pub fn with_config(config: StackConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(FakeState::new())),
        }
    }

    /// Nothing exists yet, default configuration
    pub fn absent() -> Self {
        Self::with_config(Self::default_config())
    }

    /// Cluster exists and answers but has no nodes
    pub fn empty_cluster() -> Self {
        let fake = Self::absent();
        {
            let mut state = fake.state();
            state.reachable = true;
            state.cloud.insert(("cluster".to_string(), fake.config.cluster.name.clone()));
            state.set_dns(0);
        }
        fake
    }

    /// Cluster with `count` registered nodes, none Ready
    pub fn unready_nodes(count: usize) -> Self {
        let fake = Self::empty_cluster();
        {
            let mut state = fake.state();
            for i in 0..count {
                state.nodes.push(node_value(&format!("node-{}", i), false));
            }
        }
        fake
    }

    /// Cluster with two Ready nodes, DNS and the storage provisioner running
    pub fn healthy() -> Self {
        let fake = Self::absent();
        fake.make_healthy();
        fake
    }

    /// Turn the current fake into a healthy cluster
    pub fn make_healthy(&self) {
        let storage = &self.config.storage;
        let mut state = self.state();
        state.reachable = true;
        state.cloud.insert(("cluster".to_string(), self.config.cluster.name.clone()));
        state.nodes = vec![node_value("node-0", true), node_value("node-1", true)];
        state.set_dns(2);
        state.add_provisioner_pod(&storage.provisioner_selector, &storage.provisioner_namespace);
    }

    /// Default configuration exposing trino through one route
    pub fn config_with_routes() -> StackConfig {
        let yaml = r#"
cluster:
  name: analytics
ingress:
  routes:
    - name: trino
      namespace: datalake
      host: trino.analytics.example.com
      service: trino
      port: 8080
"#;
        StackConfig::from_yaml(yaml).unwrap()
    }

    /// Healthy cluster with every phase up to and including `last` satisfied
    pub fn installed_through(last: Phase) -> Self {
        Self::installed_through_with(Self::default_config(), last)
    }

    /// Like [`FakeCluster::installed_through`] for a given configuration
    pub fn installed_through_with(config: StackConfig, last: Phase) -> Self {
        let fake = Self::with_config(config);
        fake.make_healthy();
        let config = Arc::clone(&fake.config);
        for phase in Phase::ALL.into_iter().filter(|p| *p <= last) {
            match phase {
                Phase::Foundation => {}
                Phase::Storage => fake.with_storage(),
                Phase::Compute => {
                    fake.set_release(&config.compute.namespace, &config.compute.release.name, ReleaseStatus::Deployed);
                    fake.put_object(ResourceKind::NodePool, None, &config.compute.node_pool);
                }
                Phase::CoreServices | Phase::StreamWorkloads | Phase::DatalakeWorkloads => {
                    let group = match phase {
                        Phase::CoreServices => &config.core_services,
                        Phase::StreamWorkloads => &config.stream,
                        _ => &config.datalake,
                    };
                    for release in &group.releases {
                        fake.set_release(&group.namespace, &release.name, ReleaseStatus::Deployed);
                    }
                }
                Phase::Ingress => {
                    let ingress = &config.ingress;
                    fake.set_release(&ingress.namespace, &ingress.controller.name, ReleaseStatus::Deployed);
                    for route in &ingress.routes {
                        fake.put_object(ResourceKind::Ingress, Some(&route.namespace), &route.name);
                    }
                }
            }
        }
        fake
    }

    /// Every phase satisfied
    pub fn installed() -> Self {
        Self::installed_through(Phase::Ingress)
    }

    /// Configuration the fake was built with
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Context wired to this fake for every collaborator
    pub fn context(&self, approved: bool) -> InstallContext {
        InstallContext::builder((*self.config).clone())
            .facts(Arc::new(self.clone()))
            .mutations(Arc::new(self.clone()))
            .releases(Arc::new(self.clone()))
            .provisioner(Arc::new(self.clone()))
            .approved(approved)
            .build()
            .unwrap()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Bucket and policy exist
    pub fn with_storage(&self) {
        let storage = &self.config.storage;
        let mut state = self.state();
        state.cloud.insert(("bucket".to_string(), storage.bucket.clone()));
        state.cloud.insert(("policy".to_string(), storage.policy_name.clone()));
    }

    /// Add an object of `kind`
    pub fn put_object(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) {
        let body = serde_json::json!({
            "apiVersion": kind.api_version(),
            "kind": kind.kind(),
            "metadata": {"name": name, "namespace": namespace},
        });
        self.state()
            .objects
            .insert((kind, namespace.map(str::to_string), name.to_string()), body);
    }

    fn selector_for(&self, name: &str) -> String {
        let config = &self.config;
        std::iter::once(&config.compute.release)
            .chain(std::iter::once(&config.ingress.controller))
            .chain(config.core_services.releases.iter())
            .chain(config.stream.releases.iter())
            .chain(config.datalake.releases.iter())
            .find(|r| r.name == name)
            .map(|r| r.selector())
            .unwrap_or_else(|| format!("app.kubernetes.io/instance={}", name))
    }

    /// Put a release into `status` at revision 1, with matching pods
    pub fn set_release(&self, namespace: &str, name: &str, status: ReleaseStatus) {
        let selector = self.selector_for(name);
        let mut state = self.state();
        state.sync_release_pods(namespace, name, &selector, &status);
        state.releases.insert(
            (namespace.to_string(), name.to_string()),
            Release {
                name: name.to_string(),
                status,
                revision: 1,
            },
        );
    }

    /// Status a release lands in after an upgrade-install (default `deployed`)
    pub fn set_upgrade_result(&self, name: &str, status: ReleaseStatus) {
        self.state().upgrade_results.insert(name.to_string(), status);
    }

    /// Make upgrade-installs of `name` fail outright
    pub fn fail_upgrade(&self, name: &str) {
        self.state().failing_upgrades.insert(name.to_string());
    }

    /// Report `name` as held by another operation
    pub fn lock_release(&self, name: &str) {
        self.state().locked.insert(name.to_string());
    }

    /// Whether nodes created by a node group become Ready
    pub fn set_capacity_ready(&self, ready: bool) {
        self.state().capacity_ready = ready;
    }

    /// Flip every registered node; Ready nodes bring DNS and the provisioner up
    pub fn set_nodes_ready(&self, ready: bool) {
        let storage = &self.config.storage;
        let mut state = self.state();
        let names: Vec<String> = state
            .nodes
            .iter()
            .filter_map(|n| n["metadata"]["name"].as_str().map(str::to_string))
            .collect();
        state.nodes = names.iter().map(|name| node_value(name, ready)).collect();
        if ready {
            state.set_dns(2);
            state.add_provisioner_pod(&storage.provisioner_selector, &storage.provisioner_namespace);
        }
    }

    /// Whether release pods in `namespace` become Ready
    pub fn set_pods_ready(&self, namespace: &str, ready: bool) {
        let mut state = self.state();
        if ready {
            state.unready_namespaces.remove(namespace);
        } else {
            state.unready_namespaces.insert(namespace.to_string());
        }
        for pod in state.pods.iter_mut().filter(|p| p.namespace == namespace) {
            if ready && pod.shape == PodShape::Starting {
                pod.shape = PodShape::Ready;
            } else if !ready && pod.shape == PodShape::Ready {
                pod.shape = PodShape::Starting;
            }
        }
    }

    /// Storage provisioner pods crash-loop
    pub fn crash_provisioner(&self) {
        let namespace = self.config.storage.provisioner_namespace.clone();
        let mut state = self.state();
        for pod in state
            .pods
            .iter_mut()
            .filter(|p| p.namespace == namespace && p.name.starts_with("ebs-csi-controller"))
        {
            pod.shape = PodShape::CrashLooping;
        }
        state.events.push((
            namespace,
            EventRecord {
                involved_kind: "Pod".to_string(),
                involved_name: "ebs-csi-controller-0".to_string(),
                reason: "BackOff".to_string(),
                message: "Back-off restarting failed container".to_string(),
                event_type: "Warning".to_string(),
            },
        ));
    }

    /// Make every provisioner call fail
    pub fn fail_provisioner(&self, message: &str) {
        self.state().provisioner_failure = Some(message.to_string());
    }

    /// Mutating calls made so far
    pub fn mutations(&self) -> Vec<String> {
        self.state().mutations.clone()
    }

    /// Upgrade-installs issued for release `name`
    pub fn upgrade_install_count(&self, name: &str) -> usize {
        let suffix = format!("/{}", name);
        self.state()
            .mutations
            .iter()
            .filter(|m| m.starts_with("upgrade_install ") && m.ends_with(&suffix))
            .count()
    }

    /// Read queries sent to the cluster
    pub fn fact_queries(&self) -> usize {
        self.state().fact_queries
    }
}

/// Context with custom cluster facts and the healthy fake for the rest
pub fn context_with_facts(facts: impl ClusterFacts + 'static) -> InstallContext {
    let fake = FakeCluster::healthy();
    InstallContext::builder(FakeCluster::default_config())
        .facts(Arc::new(facts))
        .mutations(Arc::new(fake.clone()))
        .releases(Arc::new(fake.clone()))
        .provisioner(Arc::new(fake))
        .build()
        .unwrap()
}

fn unreachable() -> Error {
    Error::internal("control plane unreachable")
}

#[async_trait]
impl ClusterFacts for FakeCluster {
    async fn get(&self, target: &ObjectRef) -> Result<Lookup, Error> {
        let mut state = self.state();
        state.fact_queries += 1;
        if !state.reachable {
            return Err(unreachable());
        }
        let key = (target.kind, target.namespace.clone(), target.name.clone());
        Ok(match state.objects.get(&key) {
            Some(body) => Lookup::found(body.clone()),
            None => Lookup::absent(),
        })
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Value>, Error> {
        let mut state = self.state();
        state.fact_queries += 1;
        if !state.reachable {
            return Err(unreachable());
        }
        Ok(match query.kind {
            ResourceKind::Node => state.nodes.clone(),
            ResourceKind::Pod => state
                .pods
                .iter()
                .filter(|p| query.namespace.as_deref().map_or(true, |ns| p.namespace == ns))
                .filter(|p| p.matches(query.selector.as_deref()))
                .map(FakePod::render)
                .collect(),
            kind => state
                .objects
                .iter()
                .filter(|((k, ns, _), _)| {
                    *k == kind && (query.namespace.is_none() || *ns == query.namespace)
                })
                .map(|(_, body)| body.clone())
                .collect(),
        })
    }

    async fn recent_events(&self, namespace: &str, filter: &EventFilter) -> Result<Vec<EventRecord>, Error> {
        let mut state = self.state();
        state.fact_queries += 1;
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, e)| e)
            .filter(|e| filter.involved_names.is_empty() || filter.involved_names.contains(&e.involved_name))
            .take(filter.limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MutationClient for FakeCluster {
    async fn apply(&self, manifest: &Manifest) -> Result<(), Error> {
        let mut state = self.state();
        state
            .mutations
            .push(format!("apply {} {}", manifest.kind, manifest.name()));
        state.objects.insert(
            (manifest.kind, manifest.namespace.clone(), manifest.name().to_string()),
            manifest.body.clone(),
        );
        Ok(())
    }

    async fn create_association(&self, association: &IdentityAssociation) -> Result<(), Error> {
        self.state().mutations.push(format!(
            "create_association {}/{}",
            association.namespace, association.service_account
        ));
        Ok(())
    }
}

#[async_trait]
impl ReleaseManager for FakeCluster {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>, Error> {
        Ok(self
            .state()
            .releases
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn upgrade_install(&self, spec: &ReleaseSpec) -> Result<(), Error> {
        let mut state = self.state();
        state
            .mutations
            .push(format!("upgrade_install {}/{}", spec.namespace, spec.name));
        if state.failing_upgrades.contains(&spec.name) {
            return Err(Error::release(&spec.name, &spec.namespace, "chart not found"));
        }

        let status = state
            .upgrade_results
            .get(&spec.name)
            .cloned()
            .unwrap_or(ReleaseStatus::Deployed);
        let key = (spec.namespace.clone(), spec.name.clone());
        let revision = state.releases.get(&key).map_or(1, |r| r.revision + 1);
        state.sync_release_pods(&spec.namespace, &spec.name, &spec.selector, &status);
        state.releases.insert(
            key,
            Release {
                name: spec.name.clone(),
                status,
                revision,
            },
        );
        Ok(())
    }

    async fn is_locked(&self, name: &str, _namespace: &str) -> Result<bool, Error> {
        Ok(self.state().locked.contains(name))
    }
}

#[async_trait]
impl ProvisioningClient for FakeCluster {
    async fn create_resource(&self, resource: &CloudResource) -> Result<(), Error> {
        let storage = &self.config.storage;
        let mut state = self.state();
        if let Some(message) = state.provisioner_failure.clone() {
            return Err(Error::provision(resource.to_string(), message));
        }
        state.mutations.push(format!("create_resource {}", resource));
        state
            .cloud
            .insert((resource.kind().to_string(), resource.name().to_string()));

        match resource {
            CloudResource::Cluster { .. } => {
                state.reachable = true;
                state.set_dns(0);
            }
            CloudResource::NodeGroup { desired_size, .. } => {
                let ready = state.capacity_ready;
                let start = state.nodes.len();
                for i in 0..*desired_size as usize {
                    state.nodes.push(node_value(&format!("node-{}", start + i), ready));
                }
                if ready {
                    state.set_dns(2);
                    state.add_provisioner_pod(&storage.provisioner_selector, &storage.provisioner_namespace);
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn head_resource(&self, resource: &CloudResource) -> Result<bool, Error> {
        let state = self.state();
        if let Some(message) = state.provisioner_failure.clone() {
            return Err(Error::provision(resource.to_string(), message));
        }
        Ok(state
            .cloud
            .contains(&(resource.kind().to_string(), resource.name().to_string())))
    }

    async fn create_policy(&self, name: &str, _document: &Value) -> Result<PolicyRef, Error> {
        let mut state = self.state();
        if let Some(message) = state.provisioner_failure.clone() {
            return Err(Error::provision(format!("policy {}", name), message));
        }
        state.mutations.push(format!("create_policy {}", name));
        let existed = !state.cloud.insert(("policy".to_string(), name.to_string()));
        Ok(PolicyRef {
            arn: format!("arn:aws:iam::000000000000:policy/{}", name),
            existed,
        })
    }
}
