//! Storage phase: datalake bucket, access policy and block storage.

use serde_json::{json, Value};
use tracing::{info, warn};

use lakeforge_common::{Error, MANAGED_BY_LABEL};

use crate::clients::{CloudResource, IdentityAssociation, Manifest, ResourceKind};
use crate::codes;
use crate::context::InstallContext;
use crate::diagnostics;
use crate::model::{Blocker, InstallationState, Phase};
use crate::plan::{Plan, PlanAction};

use super::{await_pods, pods_not_ready, PhaseOutcome};

/// Managed policy granting the block storage driver its volume permissions
pub(super) const EBS_CSI_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonEBSCSIDriverPolicy";

const EBS_CSI_PROVISIONER: &str = "ebs.csi.aws.com";

/// Read/write access to the datalake bucket
pub(super) fn bucket_policy(bucket: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["s3:ListBucket", "s3:GetBucketLocation"],
                "Resource": [format!("arn:aws:s3:::{}", bucket)]
            },
            {
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
                "Resource": [format!("arn:aws:s3:::{}/*", bucket)]
            }
        ]
    })
}

fn storage_class(name: &str) -> Manifest {
    Manifest {
        kind: ResourceKind::StorageClass,
        namespace: None,
        body: json!({
            "apiVersion": ResourceKind::StorageClass.api_version(),
            "kind": ResourceKind::StorageClass.kind(),
            "metadata": {
                "name": name,
                "labels": {MANAGED_BY_LABEL.0: MANAGED_BY_LABEL.1},
                "annotations": {"storageclass.kubernetes.io/is-default-class": "true"}
            },
            "provisioner": EBS_CSI_PROVISIONER,
            "volumeBindingMode": "WaitForFirstConsumer",
            "allowVolumeExpansion": true,
            "parameters": {"type": "gp3", "encrypted": "true"}
        }),
    }
}

pub(super) async fn execute(ctx: &InstallContext, outcome: &mut PhaseOutcome) -> Result<(), Error> {
    let storage = &ctx.config.storage;

    let bucket = CloudResource::Bucket {
        name: storage.bucket.clone(),
        region: ctx.config.cluster.region.clone(),
    };
    let bucket_exists = ctx.provisioner.head_resource(&bucket).await?;
    if !bucket_exists {
        info!(bucket = %storage.bucket, "creating bucket");
        ctx.provisioner.create_resource(&bucket).await?;
    }
    outcome.evidence.record("bucketCreated", !bucket_exists);

    let policy = ctx
        .provisioner
        .create_policy(&storage.policy_name, &bucket_policy(&storage.bucket))
        .await?;
    outcome.evidence.record("policyExisted", policy.existed);
    outcome.evidence.record("policyArn", policy.arn.as_str());

    ctx.mutations
        .create_association(&IdentityAssociation {
            namespace: storage.provisioner_namespace.clone(),
            service_account: storage.provisioner_service_account.clone(),
            policy_arn: EBS_CSI_POLICY_ARN.to_string(),
        })
        .await?;
    outcome
        .evidence
        .record("provisionerAssociation", storage.provisioner_service_account.as_str());

    ctx.mutations.apply(&storage_class(&storage.storage_class)).await?;
    outcome.evidence.record("storageClass", storage.storage_class.as_str());

    let wait = await_pods(
        ctx,
        outcome,
        "provisionerReady",
        &storage.provisioner_namespace,
        Some(storage.provisioner_selector.as_str()),
        ctx.config.timeouts.pods_ready(),
    )
    .await;
    if wait.outcome.ready {
        return Ok(());
    }

    if wait.report.as_ref().is_some_and(|r| r.crash_looping()) {
        warn!(selector = %storage.provisioner_selector, "storage provisioner is crash-looping");
        let diagnostics =
            diagnostics::collect(ctx, &storage.provisioner_namespace, wait.report.as_ref()).await;
        outcome.block(Blocker::gap(
            codes::STORAGE_PROVISIONER_UNHEALTHY,
            Phase::Storage,
            diagnostics.attach(&format!(
                "storage provisioner ({}) in {} is crash-looping",
                storage.provisioner_selector, storage.provisioner_namespace
            )),
        ));
    } else {
        let blocker = pods_not_ready(
            ctx,
            &storage.provisioner_namespace,
            "storage provisioner pods",
            &wait,
        )
        .await;
        outcome.block(blocker);
    }
    Ok(())
}

pub(super) fn plan(ctx: &InstallContext, state: &InstallationState) -> Plan {
    let storage = &ctx.config.storage;
    let mut plan = Plan::new(Phase::Storage);
    if !state.flag(Phase::Storage, "bucketExists") {
        plan = plan.step_with(
            PlanAction::Create,
            format!("bucket {}", storage.bucket),
            ctx.config.cluster.region.as_str(),
        );
    }
    if !state.flag(Phase::Storage, "policyExists") {
        plan = plan.step(PlanAction::Create, format!("policy {}", storage.policy_name));
    }
    plan.step(
        PlanAction::Associate,
        format!(
            "{}/{}",
            storage.provisioner_namespace, storage.provisioner_service_account
        ),
    )
    .step(PlanAction::Apply, format!("StorageClass {}", storage.storage_class))
    .step_with(
        PlanAction::Wait,
        "storage provisioner pods",
        storage.provisioner_selector.as_str(),
    )
}
