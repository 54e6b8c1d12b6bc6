//! Datalake workloads phase: bucket access for the query engines, then the
//! datalake releases.

use lakeforge_common::Error;

use crate::clients::IdentityAssociation;
use crate::context::InstallContext;
use crate::model::Phase;
use crate::plan::{Plan, PlanAction};

use super::storage::bucket_policy;
use super::{release_group, PhaseOutcome};

/// Service account the datalake charts run under
pub(super) const WORKLOAD_SERVICE_ACCOUNT: &str = "datalake-workloads";

pub(super) async fn execute(ctx: &InstallContext, outcome: &mut PhaseOutcome) -> Result<(), Error> {
    let storage = &ctx.config.storage;
    let group = &ctx.config.datalake;

    // Idempotent: returns the policy created by the storage phase
    let policy = ctx
        .provisioner
        .create_policy(&storage.policy_name, &bucket_policy(&storage.bucket))
        .await?;
    ctx.mutations
        .create_association(&IdentityAssociation {
            namespace: group.namespace.clone(),
            service_account: WORKLOAD_SERVICE_ACCOUNT.to_string(),
            policy_arn: policy.arn,
        })
        .await?;
    outcome
        .evidence
        .record("bucketAccessAssociation", format!("{}/{}", group.namespace, WORKLOAD_SERVICE_ACCOUNT));

    release_group::install(ctx, outcome, group).await;
    Ok(())
}

pub(super) fn plan(ctx: &InstallContext) -> Plan {
    let group = &ctx.config.datalake;
    let mut plan = Plan::new(Phase::DatalakeWorkloads).step_with(
        PlanAction::Associate,
        format!("{}/{}", group.namespace, WORKLOAD_SERVICE_ACCOUNT),
        format!("policy {}", ctx.config.storage.policy_name),
    );
    plan.steps
        .extend(release_group::plan(Phase::DatalakeWorkloads, group).steps);
    plan
}
