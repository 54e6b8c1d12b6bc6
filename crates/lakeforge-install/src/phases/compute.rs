//! Compute phase: autoscaling controller and its node pool.

use serde_json::{json, Value};
use tracing::info;

use lakeforge_common::{Error, MANAGED_BY_LABEL};

use crate::clients::{CloudResource, IdentityAssociation, Manifest, ReleaseSpec, ResourceKind};
use crate::context::InstallContext;
use crate::model::Phase;
use crate::plan::{Plan, PlanAction};
use crate::repair::ensure_release;

use super::{await_pods, pods_not_ready, PhaseOutcome};

/// Service account the controller chart creates
const CONTROLLER_SERVICE_ACCOUNT: &str = "karpenter";

fn controller_policy(ctx: &InstallContext) -> Value {
    let cluster = &ctx.config.cluster;
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": [
                    "ec2:CreateFleet", "ec2:CreateLaunchTemplate", "ec2:CreateTags",
                    "ec2:DeleteLaunchTemplate", "ec2:RunInstances", "ec2:TerminateInstances",
                    "ec2:Describe*", "pricing:GetProducts", "ssm:GetParameter",
                    "iam:PassRole", "eks:DescribeCluster"
                ],
                "Resource": "*"
            },
            {
                "Effect": "Allow",
                "Action": ["sqs:DeleteMessage", "sqs:GetQueueUrl", "sqs:ReceiveMessage"],
                "Resource": format!(
                    "arn:aws:sqs:{}:*:{}",
                    cluster.region, ctx.config.compute.interruption_queue
                )
            }
        ]
    })
}

fn controller_spec(ctx: &InstallContext) -> ReleaseSpec {
    let compute = &ctx.config.compute;
    ReleaseSpec::from_config(&compute.release, &compute.namespace)
        .value(
            "settings",
            json!({
                "clusterName": ctx.config.cluster.name,
                "interruptionQueue": compute.interruption_queue,
            }),
        )
        .value(
            "serviceAccount",
            json!({"name": CONTROLLER_SERVICE_ACCOUNT}),
        )
}

fn node_class(ctx: &InstallContext) -> Manifest {
    let cluster = &ctx.config.cluster.name;
    let discovery = json!([{"tags": {"karpenter.sh/discovery": cluster}}]);
    Manifest {
        kind: ResourceKind::NodeClass,
        namespace: None,
        body: json!({
            "apiVersion": ResourceKind::NodeClass.api_version(),
            "kind": ResourceKind::NodeClass.kind(),
            "metadata": {
                "name": ctx.config.compute.node_pool,
                "labels": {MANAGED_BY_LABEL.0: MANAGED_BY_LABEL.1}
            },
            "spec": {
                "role": format!("KarpenterNodeRole-{}", cluster),
                "amiSelectorTerms": [{"alias": "al2023@latest"}],
                "subnetSelectorTerms": discovery,
                "securityGroupSelectorTerms": discovery
            }
        }),
    }
}

fn node_pool(ctx: &InstallContext) -> Manifest {
    let compute = &ctx.config.compute;
    Manifest {
        kind: ResourceKind::NodePool,
        namespace: None,
        body: json!({
            "apiVersion": ResourceKind::NodePool.api_version(),
            "kind": ResourceKind::NodePool.kind(),
            "metadata": {
                "name": compute.node_pool,
                "labels": {MANAGED_BY_LABEL.0: MANAGED_BY_LABEL.1}
            },
            "spec": {
                "template": {
                    "spec": {
                        "nodeClassRef": {
                            "group": "karpenter.k8s.aws",
                            "kind": ResourceKind::NodeClass.kind(),
                            "name": compute.node_pool
                        },
                        "requirements": [
                            {
                                "key": "karpenter.k8s.aws/instance-family",
                                "operator": "In",
                                "values": compute.instance_families
                            },
                            {
                                "key": "karpenter.sh/capacity-type",
                                "operator": "In",
                                "values": ["on-demand", "spot"]
                            }
                        ]
                    }
                },
                "disruption": {"consolidationPolicy": "WhenEmptyOrUnderutilized", "consolidateAfter": "1m"}
            }
        }),
    }
}

fn policy_name(ctx: &InstallContext) -> String {
    format!("{}-karpenter-controller", ctx.config.cluster.name)
}

pub(super) async fn execute(ctx: &InstallContext, outcome: &mut PhaseOutcome) -> Result<(), Error> {
    let compute = &ctx.config.compute;

    let queue = CloudResource::Queue {
        name: compute.interruption_queue.clone(),
        region: ctx.config.cluster.region.clone(),
    };
    let queue_exists = ctx.provisioner.head_resource(&queue).await?;
    if !queue_exists {
        info!(queue = %compute.interruption_queue, "creating interruption queue");
        ctx.provisioner.create_resource(&queue).await?;
    }
    outcome.evidence.record("queueCreated", !queue_exists);

    let policy = ctx
        .provisioner
        .create_policy(&policy_name(ctx), &controller_policy(ctx))
        .await?;
    ctx.mutations
        .create_association(&IdentityAssociation {
            namespace: compute.namespace.clone(),
            service_account: CONTROLLER_SERVICE_ACCOUNT.to_string(),
            policy_arn: policy.arn.clone(),
        })
        .await?;
    outcome.evidence.record("controllerPolicyArn", policy.arn.as_str());

    let spec = controller_spec(ctx);
    let repair = ensure_release(ctx, Phase::Compute, &spec, &mut outcome.evidence).await?;
    if let Some(blocker) = repair.blocker {
        outcome.block(blocker);
        return Ok(());
    }

    let wait = await_pods(
        ctx,
        outcome,
        "controllerReady",
        &compute.namespace,
        Some(spec.selector.as_str()),
        ctx.config.timeouts.pods_ready(),
    )
    .await;
    if !wait.outcome.ready {
        let blocker = pods_not_ready(ctx, &compute.namespace, "autoscaler controller pods", &wait).await;
        outcome.block(blocker);
        return Ok(());
    }

    ctx.mutations.apply(&node_class(ctx)).await?;
    ctx.mutations.apply(&node_pool(ctx)).await?;
    outcome.evidence.record("nodePool", compute.node_pool.as_str());
    Ok(())
}

pub(super) fn plan(ctx: &InstallContext) -> Plan {
    let compute = &ctx.config.compute;
    Plan::new(Phase::Compute)
        .step(PlanAction::Create, format!("queue {}", compute.interruption_queue))
        .step(PlanAction::Create, format!("policy {}", policy_name(ctx)))
        .step(
            PlanAction::Associate,
            format!("{}/{}", compute.namespace, CONTROLLER_SERVICE_ACCOUNT),
        )
        .step_with(
            PlanAction::Install,
            format!("release {}/{}", compute.namespace, compute.release.name),
            compute.release.chart.as_str(),
        )
        .step(PlanAction::Wait, "autoscaler controller pods")
        .step(PlanAction::Apply, format!("EC2NodeClass {}", compute.node_pool))
        .step(PlanAction::Apply, format!("NodePool {}", compute.node_pool))
}
