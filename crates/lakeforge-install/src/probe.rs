//! State Prober: decides, per phase, whether the phase is already satisfied.
//!
//! Purely observational. A missing object is a fact (`satisfied = false`); only
//! a query that could not be answered at all becomes an error. When the
//! cluster does not exist or does not answer, cluster-side phases are
//! reported unsatisfied with `probed = false` and no query is sent.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use serde_json::{Map, Value};
use tracing::debug;

use lakeforge_common::kube_utils::{decode_all, node_is_ready};
use lakeforge_common::{Error, ReleaseGroupConfig, SatisfactionPolicy};

use crate::clients::{CloudResource, ListQuery, ObjectRef, ReleaseStatus, ResourceKind};
use crate::context::InstallContext;
use crate::model::{InstallationState, Phase, PhaseState};
use crate::poller::sample_pods;

/// Probe every phase
pub async fn probe(ctx: &InstallContext) -> Result<InstallationState, Error> {
    let foundation = probe_foundation(ctx).await?;
    let reachable = foundation
        .details
        .get("reachable")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut readings = vec![(Phase::Foundation, foundation)];
    for phase in &Phase::ALL[1..] {
        let state = if *phase == Phase::Storage || reachable {
            probe_phase(ctx, *phase).await?
        } else {
            PhaseState::new(false).detail("probed", false)
        };
        readings.push((*phase, state));
    }

    let state = InstallationState::from_readings(readings);
    debug!(first_unsatisfied = ?state.first_unsatisfied(), "probed installation state");
    Ok(state)
}

/// Probe a single phase, assuming the cluster answers for cluster-side phases
pub async fn probe_phase(ctx: &InstallContext, phase: Phase) -> Result<PhaseState, Error> {
    let config = &ctx.config;
    match phase {
        Phase::Foundation => probe_foundation(ctx).await,
        Phase::Storage => probe_storage(ctx).await,
        Phase::Compute => probe_compute(ctx).await,
        Phase::CoreServices => probe_release_group(ctx, &config.core_services).await,
        Phase::StreamWorkloads => probe_release_group(ctx, &config.stream).await,
        Phase::DatalakeWorkloads => probe_release_group(ctx, &config.datalake).await,
        Phase::Ingress => probe_ingress(ctx).await,
    }
}

async fn probe_foundation(ctx: &InstallContext) -> Result<PhaseState, Error> {
    let cluster = &ctx.config.cluster;
    let exists = ctx
        .provisioner
        .head_resource(&CloudResource::Cluster {
            name: cluster.name.clone(),
            region: cluster.region.clone(),
            version: cluster.kubernetes_version.clone(),
        })
        .await?;

    if !exists {
        return Ok(PhaseState::new(false)
            .detail("clusterExists", false)
            .detail("reachable", false));
    }

    // A cluster whose control plane does not answer is a state, not a failure
    let nodes = match ctx.facts.list(&ListQuery::all(ResourceKind::Node)).await {
        Ok(payloads) => decode_all::<Node>("Node", &payloads)?,
        Err(e) => {
            debug!(error = %e, "control plane not reachable");
            return Ok(PhaseState::new(false)
                .detail("clusterExists", true)
                .detail("reachable", false));
        }
    };

    let ready = nodes.iter().filter(|n| node_is_ready(n)).count();
    Ok(PhaseState::new(ready > 0)
        .detail("clusterExists", true)
        .detail("reachable", true)
        .detail("nodeCount", nodes.len() as u64)
        .detail("readyNodes", ready as u64))
}

async fn probe_storage(ctx: &InstallContext) -> Result<PhaseState, Error> {
    let storage = &ctx.config.storage;
    let bucket = ctx
        .provisioner
        .head_resource(&CloudResource::Bucket {
            name: storage.bucket.clone(),
            region: ctx.config.cluster.region.clone(),
        })
        .await?;
    let policy = ctx
        .provisioner
        .head_resource(&CloudResource::Policy {
            name: storage.policy_name.clone(),
        })
        .await?;

    Ok(PhaseState::new(bucket && policy)
        .detail("bucket", storage.bucket.as_str())
        .detail("bucketExists", bucket)
        .detail("policy", storage.policy_name.as_str())
        .detail("policyExists", policy))
}

/// Status of each named release in `namespace`, `None` when absent
async fn release_statuses(
    ctx: &InstallContext,
    namespace: &str,
    names: &[&str],
) -> Result<BTreeMap<String, Option<ReleaseStatus>>, Error> {
    let releases = ctx.releases.list_releases(namespace).await?;
    Ok(names
        .iter()
        .map(|name| {
            let status = releases
                .iter()
                .find(|r| r.name == *name)
                .map(|r| r.status.clone());
            (name.to_string(), status)
        })
        .collect())
}

fn statuses_detail(statuses: &BTreeMap<String, Option<ReleaseStatus>>) -> Value {
    let map: Map<String, Value> = statuses
        .iter()
        .map(|(name, status)| {
            let value = status
                .as_ref()
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| "missing".to_string());
            (name.clone(), Value::String(value))
        })
        .collect();
    Value::Object(map)
}

fn deployed_count(statuses: &BTreeMap<String, Option<ReleaseStatus>>) -> usize {
    statuses
        .values()
        .filter(|s| matches!(s, Some(ReleaseStatus::Deployed)))
        .count()
}

/// Pod-level check applied on top of release status when configured
async fn pods_satisfied(
    ctx: &InstallContext,
    namespace: &str,
    selector: Option<&str>,
) -> Result<Option<bool>, Error> {
    match ctx.config.execution.satisfaction {
        SatisfactionPolicy::ReleaseStatus => Ok(None),
        SatisfactionPolicy::PodReadiness => {
            Ok(Some(sample_pods(ctx, namespace, selector).await?.converged()))
        }
    }
}

fn with_pods(state: PhaseState, pods: Option<bool>) -> PhaseState {
    match pods {
        None => state,
        Some(ready) => {
            let satisfied = state.satisfied && ready;
            PhaseState {
                satisfied,
                ..state.detail("podsReady", ready)
            }
        }
    }
}

async fn probe_compute(ctx: &InstallContext) -> Result<PhaseState, Error> {
    let compute = &ctx.config.compute;
    let statuses = release_statuses(ctx, &compute.namespace, &[compute.release.name.as_str()]).await?;
    let deployed = deployed_count(&statuses) == 1;
    let node_pool = ctx
        .facts
        .get(&ObjectRef::cluster(ResourceKind::NodePool, compute.node_pool.as_str()))
        .await?
        .exists;

    let state = PhaseState::new(deployed && node_pool)
        .detail("releases", statuses_detail(&statuses))
        .detail("nodePool", compute.node_pool.as_str())
        .detail("nodePoolExists", node_pool);
    let pods = if deployed {
        let selector = compute.release.selector();
        pods_satisfied(ctx, &compute.namespace, Some(selector.as_str())).await?
    } else {
        None
    };
    Ok(with_pods(state, pods))
}

async fn probe_release_group(ctx: &InstallContext, group: &ReleaseGroupConfig) -> Result<PhaseState, Error> {
    let names: Vec<&str> = group.releases.iter().map(|r| r.name.as_str()).collect();
    let statuses = release_statuses(ctx, &group.namespace, &names).await?;
    let deployed = deployed_count(&statuses);
    let required = group.required_deployed();

    let state = PhaseState::new(deployed >= required)
        .detail("namespace", group.namespace.as_str())
        .detail("releases", statuses_detail(&statuses))
        .detail("deployed", deployed as u64)
        .detail("required", required as u64);
    let pods = if state.satisfied {
        pods_satisfied(ctx, &group.namespace, None).await?
    } else {
        None
    };
    Ok(with_pods(state, pods))
}

async fn probe_ingress(ctx: &InstallContext) -> Result<PhaseState, Error> {
    let ingress = &ctx.config.ingress;
    let statuses =
        release_statuses(ctx, &ingress.namespace, &[ingress.controller.name.as_str()]).await?;
    let controller = deployed_count(&statuses) == 1;

    let mut missing_routes = Vec::new();
    for route in &ingress.routes {
        let lookup = ctx
            .facts
            .get(&ObjectRef::namespaced(ResourceKind::Ingress, &route.namespace, route.name.as_str()))
            .await?;
        if !lookup.exists {
            missing_routes.push(Value::String(format!("{}/{}", route.namespace, route.name)));
        }
    }

    let state = PhaseState::new(controller && missing_routes.is_empty())
        .detail("releases", statuses_detail(&statuses))
        .detail("routes", ingress.routes.len() as u64)
        .detail("missingRoutes", Value::Array(missing_routes));
    let pods = if controller {
        let selector = ingress.controller.selector();
        pods_satisfied(ctx, &ingress.namespace, Some(selector.as_str())).await?
    } else {
        None
    };
    Ok(with_pods(state, pods))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    #[tokio::test]
    async fn absent_cluster_is_not_queried() {
        let fake = FakeCluster::absent();
        let state = probe(&fake.context(false)).await.unwrap();

        assert!(!state.is_satisfied(Phase::Foundation));
        assert!(!state.flag(Phase::Foundation, "clusterExists"));
        let compute = state.get(Phase::Compute).unwrap();
        assert_eq!(compute.details.get("probed"), Some(&Value::Bool(false)));
        assert_eq!(fake.fact_queries(), 0);
    }

    #[tokio::test]
    async fn empty_cluster_is_not_a_satisfied_foundation() {
        let fake = FakeCluster::empty_cluster();
        let state = probe(&fake.context(false)).await.unwrap();

        assert!(!state.is_satisfied(Phase::Foundation));
        assert!(state.flag(Phase::Foundation, "reachable"));
        assert_eq!(state.first_unsatisfied(), Some(Phase::Foundation));
    }

    #[tokio::test]
    async fn unready_nodes_leave_foundation_unsatisfied() {
        let fake = FakeCluster::unready_nodes(2);
        let state = probe(&fake.context(false)).await.unwrap();

        assert!(!state.is_satisfied(Phase::Foundation));
        let foundation = state.get(Phase::Foundation).unwrap();
        assert_eq!(foundation.details["nodeCount"], 2);
        assert_eq!(foundation.details["readyNodes"], 0);
    }

    #[tokio::test]
    async fn missing_route_leaves_ingress_unsatisfied() {
        let fake = FakeCluster::installed_through_with(FakeCluster::config_with_routes(), Phase::DatalakeWorkloads);
        fake.set_release("ingress", "ingress-nginx", ReleaseStatus::Deployed);
        let ctx = fake.context(false);

        let reading = probe_phase(&ctx, Phase::Ingress).await.unwrap();
        assert!(!reading.satisfied);
        assert_eq!(reading.details["missingRoutes"], serde_json::json!(["datalake/trino"]));

        fake.put_object(ResourceKind::Ingress, Some("datalake"), "trino");
        let reading = probe_phase(&ctx, Phase::Ingress).await.unwrap();
        assert!(reading.satisfied);
        assert_eq!(reading.details["routes"], 1);
    }

    #[tokio::test]
    async fn core_services_tolerate_one_missing_release() {
        let fake = FakeCluster::healthy();
        for name in ["postgresql", "kafka", "redis"] {
            fake.set_release("platform", name, ReleaseStatus::Deployed);
        }
        let reading = probe_phase(&fake.context(false), Phase::CoreServices).await.unwrap();
        assert!(reading.satisfied);
        assert_eq!(reading.details["releases"]["schema-registry"], "missing");
    }

    #[tokio::test]
    async fn stream_requires_every_release() {
        let fake = FakeCluster::healthy();
        fake.set_release("streaming", "flink-operator", ReleaseStatus::Deployed);
        let reading = probe_phase(&fake.context(false), Phase::StreamWorkloads).await.unwrap();
        assert!(!reading.satisfied);
        assert_eq!(reading.details["deployed"], 1);
    }

    #[tokio::test]
    async fn compute_needs_release_and_node_pool() {
        let fake = FakeCluster::healthy();
        fake.set_release("karpenter", "karpenter", ReleaseStatus::Deployed);
        let ctx = fake.context(false);
        assert!(!probe_phase(&ctx, Phase::Compute).await.unwrap().satisfied);

        fake.put_object(ResourceKind::NodePool, None, "default");
        assert!(probe_phase(&ctx, Phase::Compute).await.unwrap().satisfied);
    }

    #[tokio::test]
    async fn pod_readiness_policy_requires_ready_pods() {
        let fake = FakeCluster::with_config(FakeCluster::config_with_policy(SatisfactionPolicy::PodReadiness));
        fake.make_healthy();
        fake.set_release("streaming", "flink-operator", ReleaseStatus::Deployed);
        fake.set_release("streaming", "stream-ingest", ReleaseStatus::Deployed);
        fake.set_pods_ready("streaming", false);

        let reading = probe_phase(&fake.context(false), Phase::StreamWorkloads).await.unwrap();
        assert!(!reading.satisfied);
        assert_eq!(reading.details["podsReady"], false);
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_error() {
        let fake = FakeCluster::healthy();
        fake.fail_provisioner("throttled");
        assert!(probe(&fake.context(false)).await.is_err());
    }
}
