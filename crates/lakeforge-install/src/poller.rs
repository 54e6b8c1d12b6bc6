//! Readiness Poller.
//!
//! Two separable pieces: [`poll_until_ready`] is a bounded tick loop over any
//! async predicate, and [`evaluate_pods`] is the pure classifier used as the
//! predicate for "all expected pods Ready". Diagnostics are gathered by the
//! caller only when the poll ends in failure (see [`crate::diagnostics`]).

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use tracing::{debug, trace};

use lakeforge_common::kube_utils::{controller_kind, decode_all, pod_is_ready, pod_phase};
use lakeforge_common::Error;

use crate::clients::{ListQuery, ResourceKind};
use crate::context::InstallContext;

/// Result of a bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollOutcome {
    /// Whether the predicate held before the budget ran out
    pub ready: bool,
    /// Logical time spent: `ticks × interval`
    pub elapsed: Duration,
    /// Number of predicate samples taken
    pub ticks: u32,
}

/// Number of ticks that fit into `max_wait`, rounding up
fn tick_budget(interval: Duration, max_wait: Duration) -> u32 {
    if max_wait.is_zero() {
        return 0;
    }
    let interval = interval.max(Duration::from_millis(1)).as_nanos();
    let ticks = max_wait.as_nanos().div_ceil(interval);
    u32::try_from(ticks).unwrap_or(u32::MAX)
}

/// Sample `predicate` once per tick until it holds or `max_wait` is spent.
///
/// There is no sleep after the last tick, and `max_wait = 0` returns
/// `ready = false` without sampling. A predicate error counts as a not-ready
/// sample.
pub async fn poll_until_ready<F, Fut>(
    interval: Duration,
    max_wait: Duration,
    mut predicate: F,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let budget = tick_budget(interval, max_wait);

    for tick in 1..=budget {
        match predicate().await {
            Ok(true) => {
                return PollOutcome {
                    ready: true,
                    elapsed: interval * tick,
                    ticks: tick,
                }
            }
            Ok(false) => trace!(tick, budget, "readiness predicate not yet satisfied"),
            Err(e) => trace!(tick, budget, error = %e, "readiness sample failed"),
        }

        if tick < budget {
            tokio::time::sleep(interval).await;
        }
    }

    PollOutcome {
        ready: false,
        elapsed: interval * budget,
        ticks: budget,
    }
}

/// Classification of one pod under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodVerdict {
    /// Ready condition is True
    Ready,
    /// Expected to be ready but is not, with the most specific reason found
    NotReady(String),
    /// Does not count either way (completed job pods, terminating pods)
    Irrelevant,
}

/// A pod that is not ready, with its reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotReadyPod {
    /// Pod name
    pub name: String,
    /// Waiting/terminated reason or phase
    pub reason: String,
    /// Container message if one was reported
    pub message: Option<String>,
}

/// Pods of one sample grouped by verdict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    /// Ready pod names
    pub ready: Vec<String>,
    /// Pods that block convergence
    pub not_ready: Vec<NotReadyPod>,
    /// Pods that were ignored
    pub irrelevant: Vec<String>,
}

impl ReadinessReport {
    /// At least one relevant pod, and none not ready
    pub fn converged(&self) -> bool {
        self.not_ready.is_empty() && !(self.ready.is_empty() && self.irrelevant.is_empty())
    }

    /// Whether any pod is crash-looping
    pub fn crash_looping(&self) -> bool {
        self.not_ready.iter().any(|p| p.reason == "CrashLoopBackOff")
    }
}

/// Classify a single pod
pub fn classify_pod(pod: &Pod) -> PodVerdict {
    if pod.metadata.deletion_timestamp.is_some() {
        return PodVerdict::Irrelevant;
    }

    let phase = pod_phase(pod);
    if phase == "Succeeded" {
        return PodVerdict::Irrelevant;
    }
    if phase == "Failed" && controller_kind(&pod.metadata) == Some("Job") {
        return PodVerdict::Irrelevant;
    }
    if pod_is_ready(pod) {
        return PodVerdict::Ready;
    }

    PodVerdict::NotReady(container_reason(pod).map(|(r, _)| r).unwrap_or_else(|| phase.to_string()))
}

/// Most specific waiting/terminated reason and message of a pod's containers
fn container_reason(pod: &Pod) -> Option<(String, Option<String>)> {
    let status = pod.status.as_ref()?;
    let containers = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten());

    for cs in containers {
        let Some(state) = cs.state.as_ref() else {
            continue;
        };
        if let Some(waiting) = state.waiting.as_ref() {
            if let Some(reason) = waiting.reason.clone() {
                return Some((reason, waiting.message.clone()));
            }
        }
        if let Some(terminated) = state.terminated.as_ref() {
            if terminated.exit_code != 0 {
                let reason = terminated
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("exit code {}", terminated.exit_code));
                return Some((reason, terminated.message.clone()));
            }
        }
    }
    None
}

/// Group pods by verdict
pub fn evaluate_pods(pods: &[Pod]) -> ReadinessReport {
    let mut report = ReadinessReport::default();
    for pod in pods {
        let name = pod.metadata.name.clone().unwrap_or_default();
        match classify_pod(pod) {
            PodVerdict::Ready => report.ready.push(name),
            PodVerdict::Irrelevant => report.irrelevant.push(name),
            PodVerdict::NotReady(reason) => {
                let message = container_reason(pod).and_then(|(_, m)| m);
                report.not_ready.push(NotReadyPod {
                    name,
                    reason,
                    message,
                });
            }
        }
    }
    report
}

/// Take one sample of the pods matching `selector` in `namespace`
pub async fn sample_pods(
    ctx: &InstallContext,
    namespace: &str,
    selector: Option<&str>,
) -> Result<ReadinessReport, Error> {
    let mut query = ListQuery::in_namespace(ResourceKind::Pod, namespace);
    if let Some(selector) = selector {
        query = query.selector(selector);
    }
    let payloads = ctx.facts.list(&query).await?;
    let pods: Vec<Pod> = decode_all("Pod", &payloads)?;
    Ok(evaluate_pods(&pods))
}

/// Outcome of waiting on a set of pods, with the last sample taken
#[derive(Debug, Clone)]
pub struct PodWait {
    /// Poll outcome
    pub outcome: PollOutcome,
    /// Last successful sample, `None` if every sample failed (or none was taken)
    pub report: Option<ReadinessReport>,
}

/// Poll until every relevant pod matching `selector` is Ready
pub async fn wait_for_pods(
    ctx: &InstallContext,
    namespace: &str,
    selector: Option<&str>,
    max_wait: Duration,
) -> PodWait {
    let interval = ctx.config.timeouts.poll_interval();
    let last = Mutex::new(None);
    let last_ref = &last;

    let outcome = poll_until_ready(interval, max_wait, move || async move {
        let report = sample_pods(ctx, namespace, selector).await?;
        let converged = report.converged();
        if let Ok(mut slot) = last_ref.lock() {
            *slot = Some(report);
        }
        Ok(converged)
    })
    .await;

    debug!(
        namespace,
        selector = selector.unwrap_or("*"),
        ready = outcome.ready,
        ticks = outcome.ticks,
        "pod readiness poll finished"
    );

    PodWait {
        outcome,
        report: last.into_inner().ok().flatten(),
    }
}
