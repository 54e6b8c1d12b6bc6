//! Ingress phase: controller release and one Ingress per configured route.

use serde_json::json;

use lakeforge_common::{Error, IngressRoute, MANAGED_BY_LABEL};

use crate::clients::{Manifest, ReleaseSpec, ResourceKind};
use crate::context::InstallContext;
use crate::model::Phase;
use crate::plan::{Plan, PlanAction};
use crate::repair::ensure_release;

use super::{await_pods, pods_not_ready, PhaseOutcome};

fn route_manifest(route: &IngressRoute, class_name: &str) -> Manifest {
    Manifest {
        kind: ResourceKind::Ingress,
        namespace: Some(route.namespace.clone()),
        body: json!({
            "apiVersion": ResourceKind::Ingress.api_version(),
            "kind": ResourceKind::Ingress.kind(),
            "metadata": {
                "name": route.name,
                "namespace": route.namespace,
                "labels": {MANAGED_BY_LABEL.0: MANAGED_BY_LABEL.1}
            },
            "spec": {
                "ingressClassName": class_name,
                "rules": [{
                    "host": route.host,
                    "http": {"paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": {"service": {
                            "name": route.service,
                            "port": {"number": route.port}
                        }}
                    }]}
                }]
            }
        }),
    }
}

fn controller_spec(ctx: &InstallContext) -> ReleaseSpec {
    let ingress = &ctx.config.ingress;
    ReleaseSpec::from_config(&ingress.controller, &ingress.namespace).value(
        "controller",
        json!({"ingressClassResource": {"name": ingress.class_name, "default": true}}),
    )
}

pub(super) async fn execute(ctx: &InstallContext, outcome: &mut PhaseOutcome) -> Result<(), Error> {
    let ingress = &ctx.config.ingress;
    let spec = controller_spec(ctx);

    let repair = ensure_release(ctx, Phase::Ingress, &spec, &mut outcome.evidence).await?;
    if let Some(blocker) = repair.blocker {
        outcome.block(blocker);
        return Ok(());
    }

    let wait = await_pods(
        ctx,
        outcome,
        "controllerReady",
        &ingress.namespace,
        Some(spec.selector.as_str()),
        ctx.config.timeouts.pods_ready(),
    )
    .await;
    if !wait.outcome.ready {
        let blocker = pods_not_ready(ctx, &ingress.namespace, "ingress controller pods", &wait).await;
        outcome.block(blocker);
        return Ok(());
    }

    for route in &ingress.routes {
        ctx.mutations
            .apply(&route_manifest(route, &ingress.class_name))
            .await?;
        outcome
            .evidence
            .record("routeApplied", format!("{}/{}", route.namespace, route.name));
    }
    Ok(())
}

pub(super) fn plan(ctx: &InstallContext) -> Plan {
    let ingress = &ctx.config.ingress;
    let plan = Plan::new(Phase::Ingress)
        .step_with(
            PlanAction::Install,
            format!("release {}/{}", ingress.namespace, ingress.controller.name),
            ingress.controller.chart.as_str(),
        )
        .step(PlanAction::Wait, "ingress controller pods");
    ingress.routes.iter().fold(plan, |plan, route| {
        plan.step_with(
            PlanAction::Apply,
            format!("Ingress {}/{}", route.namespace, route.name),
            format!("{} -> {}:{}", route.host, route.service, route.port),
        )
    })
}
