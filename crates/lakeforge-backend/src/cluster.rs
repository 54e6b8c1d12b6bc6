//! Cluster facts and mutations over the kube-rs dynamic API.
//!
//! The client is created on first use, so a context can be built (and the
//! cloud side probed) before the cluster exists. Objects are exchanged with
//! the engine as JSON; typed decoding happens in the engine.

use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use lakeforge_common::kube_utils::create_client;
use lakeforge_common::retry::{retry_with_backoff, RetryConfig};
use lakeforge_common::{Error, FIELD_MANAGER};
use lakeforge_install::clients::{
    ClusterFacts, EventFilter, EventRecord, IdentityAssociation, ListQuery, Lookup, Manifest,
    MutationClient, ObjectRef, ResourceKind,
};

use crate::command::{args, CommandRunner};

/// Lazily connected kube client shared by [`KubeFacts`] and [`KubeMutator`]
pub struct KubeConnection {
    kubeconfig: Option<PathBuf>,
    client: OnceCell<Client>,
}

impl KubeConnection {
    /// Connect on first use, from `kubeconfig` or the inferred configuration
    pub fn lazy(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            kubeconfig,
            client: OnceCell::new(),
        }
    }

    /// The client, connecting on first call
    pub async fn client(&self) -> Result<Client, Error> {
        let client = self
            .client
            .get_or_try_init(|| async {
                debug!(kubeconfig = ?self.kubeconfig, "connecting to cluster");
                create_client(self.kubeconfig.as_deref()).await
            })
            .await?;
        Ok(client.clone())
    }
}

/// ApiResource for a kind, split from its `apiVersion`
pub fn api_resource(kind: ResourceKind) -> ApiResource {
    let api_version = kind.api_version();
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.kind().to_string(),
        plural: kind.plural().to_string(),
    }
}

fn dynamic_api(client: Client, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
    let ar = api_resource(kind);
    match namespace {
        Some(ns) if kind.namespaced() => Api::namespaced_with(client, ns, &ar),
        _ => Api::all_with(client, &ar),
    }
}

fn to_event_record(event: Event) -> EventRecord {
    EventRecord {
        involved_kind: event.involved_object.kind.unwrap_or_default(),
        involved_name: event.involved_object.name.unwrap_or_default(),
        reason: event.reason.unwrap_or_default(),
        message: event.message.unwrap_or_default(),
        event_type: event.type_.unwrap_or_default(),
    }
}

/// Newest-first events matching `filter`
fn select_events(mut events: Vec<Event>, filter: &EventFilter) -> Vec<EventRecord> {
    events.sort_by_key(|e| {
        Reverse(
            e.last_timestamp
                .as_ref()
                .map(|t| t.0)
                .or_else(|| e.event_time.as_ref().map(|t| t.0))
                .or_else(|| e.metadata.creation_timestamp.as_ref().map(|t| t.0)),
        )
    });
    events
        .into_iter()
        .filter(|e| {
            filter.involved_names.is_empty()
                || e.involved_object
                    .name
                    .as_ref()
                    .is_some_and(|n| filter.involved_names.contains(n))
        })
        .take(filter.limit)
        .map(to_event_record)
        .collect()
}

/// kube-rs backed [`ClusterFacts`]
pub struct KubeFacts {
    connection: Arc<KubeConnection>,
}

impl KubeFacts {
    /// Create facts over a shared connection
    pub fn new(connection: Arc<KubeConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ClusterFacts for KubeFacts {
    async fn get(&self, target: &ObjectRef) -> Result<Lookup, Error> {
        let client = self.connection.client().await?;
        let api = dynamic_api(client, target.kind, target.namespace.as_deref());
        match api.get(&target.name).await {
            Ok(obj) => Ok(Lookup::found(serde_json::to_value(obj)?)),
            // A kind whose CRD is not installed has no objects either
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(Lookup::absent()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Value>, Error> {
        let client = self.connection.client().await?;
        let api = dynamic_api(client, query.kind, query.namespace.as_deref());
        let mut params = ListParams::default();
        if let Some(selector) = &query.selector {
            params = params.labels(selector);
        }
        let objects = match api.list(&params).await {
            Ok(list) => list.items,
            Err(kube::Error::Api(ae)) if ae.code == 404 => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        objects
            .into_iter()
            .map(|obj| serde_json::to_value(obj).map_err(Error::from))
            .collect()
    }

    async fn recent_events(&self, namespace: &str, filter: &EventFilter) -> Result<Vec<EventRecord>, Error> {
        let client = self.connection.client().await?;
        let api: Api<Event> = Api::namespaced(client, namespace);
        let events = api.list(&ListParams::default()).await?.items;
        Ok(select_events(events, filter))
    }
}

/// kube-rs backed [`MutationClient`]
///
/// Manifests are server-side applied; identity associations go through
/// `eksctl` since they live on the cloud side of the cluster.
pub struct KubeMutator {
    connection: Arc<KubeConnection>,
    runner: Arc<dyn CommandRunner>,
    cluster: String,
    region: String,
    retry: RetryConfig,
}

impl KubeMutator {
    /// Create a mutator for `cluster` in `region`
    pub fn new(
        connection: Arc<KubeConnection>,
        runner: Arc<dyn CommandRunner>,
        cluster: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            runner,
            cluster: cluster.into(),
            region: region.into(),
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy for association calls
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn association_args(&self, association: &IdentityAssociation) -> Vec<String> {
        args(&[
            "create",
            "podidentityassociation",
            "--cluster",
            self.cluster.as_str(),
            "--region",
            self.region.as_str(),
            "--namespace",
            association.namespace.as_str(),
            "--service-account-name",
            association.service_account.as_str(),
            "--permission-policy-arns",
            association.policy_arn.as_str(),
        ])
    }
}

#[async_trait]
impl MutationClient for KubeMutator {
    async fn apply(&self, manifest: &Manifest) -> Result<(), Error> {
        let name = manifest.name();
        if name.is_empty() {
            return Err(Error::validation_for_field(
                "metadata.name",
                format!("{} manifest has no name", manifest.kind),
            ));
        }
        let obj: DynamicObject = serde_json::from_value(manifest.body.clone())
            .map_err(|e| Error::serialization_for_kind(manifest.kind.kind(), e.to_string()))?;

        let client = self.connection.client().await?;
        let api = dynamic_api(client, manifest.kind, manifest.namespace.as_deref());
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&obj),
        )
        .await?;

        info!(
            kind = %manifest.kind,
            name = %name,
            namespace = ?manifest.namespace,
            "Applied manifest"
        );
        Ok(())
    }

    async fn create_association(&self, association: &IdentityAssociation) -> Result<(), Error> {
        let argv = self.association_args(association);
        retry_with_backoff(&self.retry, "eksctl create podidentityassociation", || async {
            let output = self.runner.run("eksctl", &argv, None).await?;
            if output.success() || output.stderr_contains(&["already exists", "ResourceInUseException"]) {
                Ok(())
            } else {
                Err(Error::command("eksctl", output.stderr.trim().to_string()))
            }
        })
        .await?;
        info!(
            namespace = %association.namespace,
            service_account = %association.service_account,
            "Associated service account with policy"
        );
        Ok(())
    }
}
