//! Shared Kubernetes helpers using kube-rs and k8s-openapi types
//!
//! The engine observes the cluster as untyped JSON payloads (see the
//! `ClusterFacts` trait); these helpers decode the payloads it cares about
//! into k8s-openapi types and evaluate standard conditions on them.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::de::DeserializeOwned;

use crate::Error;

/// The "Ready" condition type for nodes and pods
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Check if a Kubernetes condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::NodeCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

impl HasConditionFields for k8s_openapi::api::core::v1::PodCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

impl HasConditionFields for k8s_openapi::api::apps::v1::DeploymentCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Decode a JSON payload returned by a facts query into a typed object.
pub fn decode<T: DeserializeOwned>(kind: &str, payload: &serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// Decode a list of payloads, failing on the first malformed item.
pub fn decode_all<T: DeserializeOwned>(
    kind: &str,
    payloads: &[serde_json::Value],
) -> Result<Vec<T>, Error> {
    payloads.iter().map(|p| decode(kind, p)).collect()
}

/// Whether a node reports the Ready condition
pub fn node_is_ready(node: &Node) -> bool {
    let conditions = node.status.as_ref().and_then(|s| s.conditions.as_ref());
    has_condition(conditions.map(|c| c.as_slice()), CONDITION_READY)
}

/// Whether a pod reports the Ready condition
pub fn pod_is_ready(pod: &Pod) -> bool {
    let conditions = pod.status.as_ref().and_then(|s| s.conditions.as_ref());
    has_condition(conditions.map(|c| c.as_slice()), CONDITION_READY)
}

/// The pod phase, or "Unknown" when the status is missing
pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

/// Kind of the controlling owner of an object (e.g. "Job", "ReplicaSet")
pub fn controller_kind(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> Option<&str> {
    meta.owner_references.as_ref().and_then(|refs| {
        refs.iter()
            .find(|r| r.controller.unwrap_or(false))
            .or_else(|| refs.first())
            .map(|r| r.kind.as_str())
    })
}

/// Number of available replicas reported by a deployment
pub fn deployment_available_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus, PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn node_with_ready(status: &str) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: CONDITION_READY.to_string(),
                    status: status.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn node_ready_requires_true_status() {
        assert!(node_is_ready(&node_with_ready("True")));
        assert!(!node_is_ready(&node_with_ready("False")));
        assert!(!node_is_ready(&node_with_ready("Unknown")));
        assert!(!node_is_ready(&Node::default()));
    }

    #[test]
    fn pod_ready_reads_pod_conditions() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: CONDITION_READY.to_string(),
                    status: STATUS_TRUE.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(pod_is_ready(&pod));
        assert_eq!(pod_phase(&pod), "Running");
        assert_eq!(pod_phase(&Pod::default()), "Unknown");
    }

    #[test]
    fn controller_kind_prefers_controller_reference() {
        let meta = ObjectMeta {
            owner_references: Some(vec![
                OwnerReference {
                    kind: "ConfigMap".to_string(),
                    controller: Some(false),
                    ..Default::default()
                },
                OwnerReference {
                    kind: "Job".to_string(),
                    controller: Some(true),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        assert_eq!(controller_kind(&meta), Some("Job"));
        assert_eq!(controller_kind(&ObjectMeta::default()), None);
    }

    #[test]
    fn decode_reports_kind_on_failure() {
        let err = decode::<Node>("Node", &serde_json::json!({"status": 5})).unwrap_err();
        assert!(matches!(err, Error::Serialization { kind: Some(ref k), .. } if k == "Node"));
    }
}
