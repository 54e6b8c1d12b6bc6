//! Health Gate: fixed platform predicates every cluster-side phase depends on.
//!
//! The checks run in a fixed order. An empty node list is reported alone,
//! since nothing else can be meaningful without nodes; node readiness and
//! cluster DNS are then both evaluated so one invocation surfaces every gap.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Node;
use serde::Serialize;
use tracing::debug;

use lakeforge_common::kube_utils::{decode, decode_all, deployment_available_replicas, node_is_ready};
use lakeforge_common::{Error, CORE_DNS_DEPLOYMENT, KUBE_SYSTEM_NAMESPACE};

use crate::clients::{ListQuery, ObjectRef, ResourceKind};
use crate::codes;
use crate::context::InstallContext;
use crate::model::{Blocker, Phase};

/// Outcome of the health gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthVerdict {
    /// No blockers were found
    pub healthy: bool,
    /// Itemized gaps, all owned by Foundation
    pub blockers: Vec<Blocker>,
    /// Nodes seen
    pub total_nodes: usize,
    /// Nodes reporting Ready
    pub ready_nodes: usize,
}

/// Evaluate the gate over already-fetched nodes and the DNS deployment
pub fn evaluate(nodes: &[Node], dns: Option<&Deployment>) -> HealthVerdict {
    let total_nodes = nodes.len();
    let ready_nodes = nodes.iter().filter(|n| node_is_ready(n)).count();
    let mut blockers = Vec::new();

    if total_nodes == 0 {
        blockers.push(Blocker::gap(
            codes::NO_NODES_AVAILABLE,
            Phase::Foundation,
            "cluster has no nodes; worker capacity must be created by the foundation phase",
        ));
        return HealthVerdict {
            healthy: false,
            blockers,
            total_nodes,
            ready_nodes,
        };
    }

    if ready_nodes == 0 {
        blockers.push(Blocker::gap(
            codes::NO_READY_NODES,
            Phase::Foundation,
            format!("{} node(s) registered but none reports Ready", total_nodes),
        ));
    }

    match dns {
        None => blockers.push(Blocker::gap(
            codes::DNS_NOT_DEPLOYED,
            Phase::Foundation,
            format!(
                "deployment {}/{} not found",
                KUBE_SYSTEM_NAMESPACE, CORE_DNS_DEPLOYMENT
            ),
        )),
        Some(deployment) if deployment_available_replicas(deployment) < 1 => {
            blockers.push(Blocker::gap(
                codes::DNS_NOT_READY,
                Phase::Foundation,
                format!(
                    "deployment {}/{} has no available replicas",
                    KUBE_SYSTEM_NAMESPACE, CORE_DNS_DEPLOYMENT
                ),
            ))
        }
        Some(_) => {}
    }

    HealthVerdict {
        healthy: blockers.is_empty(),
        blockers,
        total_nodes,
        ready_nodes,
    }
}

/// Fetch nodes and the DNS deployment, then evaluate the gate
pub async fn check(ctx: &InstallContext) -> Result<HealthVerdict, Error> {
    let payloads = ctx.facts.list(&ListQuery::all(ResourceKind::Node)).await?;
    let nodes: Vec<Node> = decode_all("Node", &payloads)?;

    // DNS is irrelevant without nodes; skip the query
    let dns = if nodes.is_empty() {
        None
    } else {
        let lookup = ctx
            .facts
            .get(&ObjectRef::namespaced(
                ResourceKind::Deployment,
                KUBE_SYSTEM_NAMESPACE,
                CORE_DNS_DEPLOYMENT,
            ))
            .await?;
        match lookup.payload {
            Some(payload) if lookup.exists => Some(decode::<Deployment>("Deployment", &payload)?),
            _ => None,
        }
    };

    let verdict = evaluate(&nodes, dns.as_ref());
    debug!(
        healthy = verdict.healthy,
        total_nodes = verdict.total_nodes,
        ready_nodes = verdict.ready_nodes,
        blockers = verdict.blockers.len(),
        "health gate evaluated"
    );
    Ok(verdict)
}
