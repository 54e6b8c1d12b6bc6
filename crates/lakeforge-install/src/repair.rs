//! Self-Healing Repair Unit.
//!
//! Distinguishes an absent dependency (install it), a present-but-broken one
//! (repair it exactly once and re-verify) and one held by another operation
//! (wait a bounded time, then hand the user a recovery command). Nothing here
//! loops beyond a single repair per invocation.

use k8s_openapi::api::core::v1::Node;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use lakeforge_common::kube_utils::{decode_all, node_is_ready};
use lakeforge_common::Error;

use crate::clients::{CloudResource, ListQuery, Release, ReleaseSpec, ReleaseStatus, ResourceKind};
use crate::codes;
use crate::context::InstallContext;
use crate::model::{Blocker, Evidence, Phase};
use crate::poller::poll_until_ready;

/// What ensuring a dependency did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    /// Already deployed; nothing done
    Healthy,
    /// Was absent and has been installed
    Installed,
    /// Was failed and recovered after one repair
    Repaired,
    /// Was failed and did not recover after one repair
    StillBroken,
    /// Held by another operation past the lock wait
    Locked,
}

/// Result of [`ensure_release`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRepair {
    /// What happened
    pub outcome: RepairOutcome,
    /// Blocker for `StillBroken` and `Locked`
    pub blocker: Option<Blocker>,
}

impl ReleaseRepair {
    fn ok(outcome: RepairOutcome) -> Self {
        Self {
            outcome,
            blocker: None,
        }
    }
}

async fn find_release(ctx: &InstallContext, spec: &ReleaseSpec) -> Result<Option<Release>, Error> {
    let releases = ctx.releases.list_releases(&spec.namespace).await?;
    Ok(releases.into_iter().find(|r| r.name == spec.name))
}

/// Bring a release to `deployed`, repairing a failed one at most once.
///
/// `phase` owns the blockers raised here: a locked or irreparable release of
/// this phase is reported as a gap that this phase has to revisit.
pub async fn ensure_release(
    ctx: &InstallContext,
    phase: Phase,
    spec: &ReleaseSpec,
    evidence: &mut Evidence,
) -> Result<ReleaseRepair, Error> {
    let timeouts = &ctx.config.timeouts;
    let mut current = find_release(ctx, spec).await?;

    if current.as_ref().is_some_and(|r| r.status.is_pending()) {
        info!(release = %spec.name, namespace = %spec.namespace, "release is locked by another operation, waiting");
        let outcome = poll_until_ready(timeouts.poll_interval(), timeouts.lock_wait(), || async {
            Ok(!ctx.releases.is_locked(&spec.name, &spec.namespace).await?)
        })
        .await;
        evidence.record("lockWaitMs", outcome.elapsed.as_millis() as u64);

        if !outcome.ready {
            warn!(release = %spec.name, "release still locked after lock wait");
            record_outcome(evidence, spec, RepairOutcome::Locked);
            return Ok(ReleaseRepair {
                outcome: RepairOutcome::Locked,
                blocker: Some(Blocker::gap(
                    codes::RELEASE_LOCKED,
                    phase,
                    format!(
                        "release {}/{} is held by another operation after {}s; recover manually with `{}`",
                        spec.namespace,
                        spec.name,
                        timeouts.lock_wait_secs,
                        spec.recovery_command()
                    ),
                )),
            });
        }
        current = find_release(ctx, spec).await?;
    }

    let outcome = match current.map(|r| r.status) {
        None => {
            info!(release = %spec.name, namespace = %spec.namespace, chart = %spec.chart, "installing release");
            ctx.releases.upgrade_install(spec).await?;
            evidence.record("freshInstall", true);
            RepairOutcome::Installed
        }
        Some(ReleaseStatus::Deployed) => RepairOutcome::Healthy,
        Some(status) if status.is_failure() => {
            return repair_failed(ctx, phase, spec, evidence).await;
        }
        Some(status) => {
            info!(release = %spec.name, status = %status, "re-installing release");
            ctx.releases.upgrade_install(spec).await?;
            evidence.record("freshInstall", false);
            RepairOutcome::Installed
        }
    };

    record_outcome(evidence, spec, outcome);
    Ok(ReleaseRepair::ok(outcome))
}

async fn repair_failed(
    ctx: &InstallContext,
    phase: Phase,
    spec: &ReleaseSpec,
    evidence: &mut Evidence,
) -> Result<ReleaseRepair, Error> {
    let timeouts = &ctx.config.timeouts;
    warn!(release = %spec.name, namespace = %spec.namespace, "release is failed, attempting one repair");
    evidence.record("repairAttempted", true);
    ctx.releases.upgrade_install(spec).await?;

    let verified = poll_until_ready(timeouts.poll_interval(), timeouts.repair_wait(), || async {
        Ok(find_release(ctx, spec)
            .await?
            .is_some_and(|r| r.status == ReleaseStatus::Deployed))
    })
    .await;
    evidence.record("repairWaitMs", verified.elapsed.as_millis() as u64);

    if verified.ready {
        info!(release = %spec.name, "release repaired");
        record_outcome(evidence, spec, RepairOutcome::Repaired);
        return Ok(ReleaseRepair::ok(RepairOutcome::Repaired));
    }

    let status = find_release(ctx, spec)
        .await
        .ok()
        .flatten()
        .map(|r| r.status.to_string())
        .unwrap_or_else(|| "missing".to_string());
    warn!(release = %spec.name, status = %status, "release did not recover after repair");
    record_outcome(evidence, spec, RepairOutcome::StillBroken);
    Ok(ReleaseRepair {
        outcome: RepairOutcome::StillBroken,
        blocker: Some(Blocker::gap(
            codes::RELEASE_REPAIR_FAILED,
            phase,
            format!(
                "release {}/{} is still {} after one repair attempt (waited {}s); inspect with `helm history {} -n {}`",
                spec.namespace,
                spec.name,
                status,
                timeouts.repair_wait_secs,
                spec.name,
                spec.namespace
            ),
        )),
    })
}

fn record_outcome(evidence: &mut Evidence, spec: &ReleaseSpec, outcome: RepairOutcome) {
    evidence.record(
        "release",
        json!({"name": spec.name, "namespace": spec.namespace, "outcome": outcome}),
    );
}

/// Node counts after creating capacity
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityCheck {
    /// Nodes registered after the grace period
    pub total_nodes: usize,
    /// Nodes Ready after the grace period
    pub ready_nodes: usize,
    /// Blocker when no node became Ready
    pub blocker: Option<Blocker>,
}

/// The configured node group as a cloud resource
pub fn node_group(ctx: &InstallContext) -> CloudResource {
    let cluster = &ctx.config.cluster;
    let group = &cluster.node_group;
    CloudResource::NodeGroup {
        cluster: cluster.name.clone(),
        name: group.name.clone(),
        region: cluster.region.clone(),
        instance_type: group.instance_type.clone(),
        min_size: group.min_size,
        max_size: group.max_size,
        desired_size: group.desired_size,
    }
}

/// Create the configured node group, wait the grace period and re-check once
pub async fn ensure_capacity(ctx: &InstallContext, evidence: &mut Evidence) -> Result<CapacityCheck, Error> {
    let cluster = &ctx.config.cluster;
    let group = &cluster.node_group;

    warn!(cluster = %cluster.name, nodegroup = %group.name, "no usable worker capacity, creating node group");
    ctx.provisioner.create_resource(&node_group(ctx)).await?;
    evidence.record("capacityCreated", true);

    tokio::time::sleep(ctx.config.timeouts.capacity_grace()).await;

    let payloads = ctx.facts.list(&ListQuery::all(ResourceKind::Node)).await?;
    let nodes: Vec<Node> = decode_all("Node", &payloads)?;
    let total_nodes = nodes.len();
    let ready_nodes = nodes.iter().filter(|n| node_is_ready(n)).count();
    evidence.record("nodeCount", total_nodes as u64);
    evidence.record("readyNodes", ready_nodes as u64);

    let blocker = (ready_nodes == 0).then(|| {
        Blocker::gap(
            codes::CAPACITY_NOT_READY,
            Phase::Foundation,
            format!(
                "node group {} created but {} of {} node(s) Ready after {}s",
                group.name,
                ready_nodes,
                total_nodes,
                ctx.config.timeouts.capacity_grace_secs
            ),
        )
    });

    Ok(CapacityCheck {
        total_nodes,
        ready_nodes,
        blocker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    fn karpenter(fake: &FakeCluster) -> ReleaseSpec {
        let config = &fake.config().compute;
        ReleaseSpec::from_config(&config.release, &config.namespace)
    }

    #[tokio::test(start_paused = true)]
    async fn absent_release_is_installed() {
        let fake = FakeCluster::healthy();
        let ctx = fake.context(true);
        let spec = karpenter(&fake);
        let mut evidence = Evidence::new(Phase::Compute);

        let result = ensure_release(&ctx, Phase::Compute, &spec, &mut evidence).await.unwrap();
        assert_eq!(result.outcome, RepairOutcome::Installed);
        assert_eq!(evidence.flag("freshInstall"), Some(true));
        assert_eq!(fake.upgrade_install_count("karpenter"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deployed_release_is_left_alone() {
        let fake = FakeCluster::healthy();
        fake.set_release("karpenter", "karpenter", ReleaseStatus::Deployed);
        let ctx = fake.context(true);
        let mut evidence = Evidence::new(Phase::Compute);

        let result = ensure_release(&ctx, Phase::Compute, &karpenter(&fake), &mut evidence)
            .await
            .unwrap();
        assert_eq!(result.outcome, RepairOutcome::Healthy);
        assert!(fake.mutations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_release_is_repaired_once() {
        let fake = FakeCluster::healthy();
        fake.set_release("karpenter", "karpenter", ReleaseStatus::Failed);
        let ctx = fake.context(true);
        let mut evidence = Evidence::new(Phase::Compute);

        let result = ensure_release(&ctx, Phase::Compute, &karpenter(&fake), &mut evidence)
            .await
            .unwrap();
        assert_eq!(result.outcome, RepairOutcome::Repaired);
        assert_eq!(evidence.flag("repairAttempted"), Some(true));
        assert_eq!(fake.upgrade_install_count("karpenter"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn irreparable_release_blocks_after_single_attempt() {
        let fake = FakeCluster::healthy();
        fake.set_release("karpenter", "karpenter", ReleaseStatus::Failed);
        fake.set_upgrade_result("karpenter", ReleaseStatus::Failed);
        let ctx = fake.context(true);
        let mut evidence = Evidence::new(Phase::Compute);

        let result = ensure_release(&ctx, Phase::Compute, &karpenter(&fake), &mut evidence)
            .await
            .unwrap();
        assert_eq!(result.outcome, RepairOutcome::StillBroken);
        let blocker = result.blocker.unwrap();
        assert_eq!(blocker.code, codes::RELEASE_REPAIR_FAILED);
        assert_eq!(blocker.owner, Some(Phase::Compute));
        assert_eq!(fake.upgrade_install_count("karpenter"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn locked_release_names_recovery_command() {
        let fake = FakeCluster::healthy();
        fake.set_release("karpenter", "karpenter", ReleaseStatus::PendingUpgrade);
        fake.lock_release("karpenter");
        let ctx = fake.context(true);
        let mut evidence = Evidence::new(Phase::Compute);

        let result = ensure_release(&ctx, Phase::Compute, &karpenter(&fake), &mut evidence)
            .await
            .unwrap();
        assert_eq!(result.outcome, RepairOutcome::Locked);
        let blocker = result.blocker.unwrap();
        assert_eq!(blocker.code, codes::RELEASE_LOCKED);
        assert!(blocker.message.contains("helm rollback karpenter -n karpenter"));
        assert_eq!(fake.upgrade_install_count("karpenter"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_is_recorded_even_when_nodes_stay_unready() {
        let fake = FakeCluster::empty_cluster();
        fake.set_capacity_ready(false);
        let ctx = fake.context(true);
        let mut evidence = Evidence::new(Phase::Foundation);

        let check = ensure_capacity(&ctx, &mut evidence).await.unwrap();
        assert_eq!(evidence.flag("capacityCreated"), Some(true));
        assert_eq!(check.ready_nodes, 0);
        assert_eq!(check.blocker.unwrap().code, codes::CAPACITY_NOT_READY);
    }
}
