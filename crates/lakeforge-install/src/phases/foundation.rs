//! Foundation phase: managed cluster and initial worker capacity.

use k8s_openapi::api::core::v1::Node;
use tracing::info;

use lakeforge_common::kube_utils::{decode_all, node_is_ready};
use lakeforge_common::Error;

use crate::clients::{CloudResource, ListQuery, ResourceKind};
use crate::codes;
use crate::context::InstallContext;
use crate::model::{Blocker, InstallationState, Phase};
use crate::plan::{Plan, PlanAction};
use crate::poller::poll_until_ready;
use crate::repair::{ensure_capacity, node_group};

use super::PhaseOutcome;

fn cluster_resource(ctx: &InstallContext) -> CloudResource {
    let cluster = &ctx.config.cluster;
    CloudResource::Cluster {
        name: cluster.name.clone(),
        region: cluster.region.clone(),
        version: cluster.kubernetes_version.clone(),
    }
}

pub(super) async fn execute(ctx: &InstallContext, outcome: &mut PhaseOutcome) -> Result<(), Error> {
    let cluster = cluster_resource(ctx);
    let exists = ctx.provisioner.head_resource(&cluster).await?;
    if !exists {
        info!(cluster = %cluster.name(), "creating cluster");
        ctx.provisioner.create_resource(&cluster).await?;
    }
    outcome.evidence.record("clusterCreated", !exists);

    let timeouts = &ctx.config.timeouts;
    let answered = poll_until_ready(timeouts.poll_interval(), timeouts.cluster_ready(), || async {
        ctx.facts.list(&ListQuery::all(ResourceKind::Node)).await.map(|_| true)
    })
    .await;
    outcome
        .evidence
        .record("controlPlaneReadyMs", answered.elapsed.as_millis() as u64);

    if !answered.ready {
        outcome.block(Blocker::failure(
            codes::CLUSTER_NOT_READY,
            format!(
                "control plane of cluster {} did not answer within {}s",
                cluster.name(),
                timeouts.cluster_ready_secs
            ),
        ));
        return Ok(());
    }

    let nodes = list_nodes(ctx).await?;
    let ready = ready_count(&nodes);
    if ready > 0 {
        outcome.evidence.record("capacityCreated", false);
        outcome.evidence.record("nodeCount", nodes.len() as u64);
        outcome.evidence.record("readyNodes", ready as u64);
        return Ok(());
    }

    // Nodes that never turn Ready without their node group get fresh capacity
    if nodes.is_empty() || !ctx.provisioner.head_resource(&node_group(ctx)).await? {
        let check = ensure_capacity(ctx, &mut outcome.evidence).await?;
        if let Some(blocker) = check.blocker {
            outcome.block(blocker);
        }
        return Ok(());
    }

    outcome.evidence.record("capacityCreated", false);
    await_ready_nodes(ctx, outcome).await
}

async fn list_nodes(ctx: &InstallContext) -> Result<Vec<Node>, Error> {
    let payloads = ctx.facts.list(&ListQuery::all(ResourceKind::Node)).await?;
    decode_all("Node", &payloads)
}

fn ready_count(nodes: &[Node]) -> usize {
    nodes.iter().filter(|n| node_is_ready(n)).count()
}

/// Give registered nodes of an existing node group the grace period to turn Ready
async fn await_ready_nodes(ctx: &InstallContext, outcome: &mut PhaseOutcome) -> Result<(), Error> {
    let timeouts = &ctx.config.timeouts;
    let wait = poll_until_ready(timeouts.poll_interval(), timeouts.capacity_grace(), || async {
        Ok(ready_count(&list_nodes(ctx).await?) > 0)
    })
    .await;
    outcome
        .evidence
        .record("nodesReadyMs", wait.elapsed.as_millis() as u64);

    let nodes = list_nodes(ctx).await?;
    let ready = ready_count(&nodes);
    outcome.evidence.record("nodeCount", nodes.len() as u64);
    outcome.evidence.record("readyNodes", ready as u64);

    if ready == 0 {
        outcome.block(Blocker::gap(
            codes::NO_READY_NODES,
            Phase::Foundation,
            format!(
                "node group {} has {} node(s) registered but none reports Ready after {}s; inspect with `kubectl describe nodes`",
                ctx.config.cluster.node_group.name,
                nodes.len(),
                timeouts.capacity_grace_secs
            ),
        ));
    }
    Ok(())
}

pub(super) fn plan(ctx: &InstallContext, state: &InstallationState) -> Plan {
    let cluster = &ctx.config.cluster;
    let group = &cluster.node_group;
    let mut plan = Plan::new(Phase::Foundation);

    if !state.flag(Phase::Foundation, "clusterExists") {
        plan = plan.step_with(
            PlanAction::Create,
            format!("cluster {}", cluster.name),
            format!("{}, kubernetes {}", cluster.region, cluster.kubernetes_version),
        );
    }
    plan.step(PlanAction::Wait, "control plane reachable").step_with(
        PlanAction::Create,
        format!("nodegroup {} (when the cluster has no Ready nodes)", group.name),
        format!(
            "{} x{} ({}..{})",
            group.instance_type, group.desired_size, group.min_size, group.max_size
        ),
    )
}
