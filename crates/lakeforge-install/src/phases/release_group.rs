//! Shared body for phases that install an ordered list of releases.

use lakeforge_common::ReleaseGroupConfig;

use crate::clients::ReleaseSpec;
use crate::context::InstallContext;
use crate::model::{Evidence, Phase};
use crate::plan::{Plan, PlanAction};
use crate::repair::ensure_release;
use crate::tasks::{run_tasks, TaskFailure, TaskReport};

use super::{await_pods, pods_not_ready, PhaseOutcome};

/// Ensure every release of `group` in order, then wait for the namespace's pods
pub(super) async fn install(ctx: &InstallContext, outcome: &mut PhaseOutcome, group: &ReleaseGroupConfig) {
    let phase = outcome.evidence.phase;
    let tasks: Vec<(String, ReleaseSpec)> = group
        .releases
        .iter()
        .map(|r| (r.name.clone(), ReleaseSpec::from_config(r, &group.namespace)))
        .collect();

    let blockers = run_tasks(&mut outcome.evidence, tasks, move |spec| async move {
        let mut scratch = Evidence::new(phase);
        match ensure_release(ctx, phase, &spec, &mut scratch).await {
            Ok(repair) => Ok(TaskReport::from_evidence(scratch).with_blocker(repair.blocker)),
            Err(error) => Err(TaskFailure::new(scratch, error)),
        }
    })
    .await;

    if !blockers.is_empty() {
        outcome.blockers.extend(blockers);
        return;
    }

    let wait = await_pods(
        ctx,
        outcome,
        "podsReady",
        &group.namespace,
        None,
        ctx.config.timeouts.pods_ready(),
    )
    .await;
    if !wait.outcome.ready {
        let blocker = pods_not_ready(ctx, &group.namespace, &format!("{} pods", phase), &wait).await;
        outcome.block(blocker);
    }
}

/// One install step per release plus the final wait
pub(super) fn plan(phase: Phase, group: &ReleaseGroupConfig) -> Plan {
    let plan = group.releases.iter().fold(Plan::new(phase), |plan, release| {
        let detail = match &release.version {
            Some(version) => format!("{} {}", release.chart, version),
            None => release.chart.clone(),
        };
        plan.step_with(
            PlanAction::Install,
            format!("release {}/{}", group.namespace, release.name),
            detail,
        )
    });
    plan.step(PlanAction::Wait, format!("pods in namespace {}", group.namespace))
}
