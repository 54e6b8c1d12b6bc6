//! Blocker codes.
//!
//! Health codes and predecessor gaps are dependency gaps (they always come
//! with an owning phase); the remaining codes are execution failures unless a
//! phase body explicitly raises them as gaps.

/// The cluster has no nodes at all
pub const NO_NODES_AVAILABLE: &str = "NO_NODES_AVAILABLE";
/// Nodes exist but none reports Ready
pub const NO_READY_NODES: &str = "NO_READY_NODES";
/// The cluster DNS deployment does not exist
pub const DNS_NOT_DEPLOYED: &str = "DNS_NOT_DEPLOYED";
/// The cluster DNS deployment has no available replicas
pub const DNS_NOT_READY: &str = "DNS_NOT_READY";
/// A predecessor phase is not satisfied
pub const PREDECESSOR_UNSATISFIED: &str = "PREDECESSOR_UNSATISFIED";
/// The storage provisioner exists but is not healthy
pub const STORAGE_PROVISIONER_UNHEALTHY: &str = "STORAGE_PROVISIONER_UNHEALTHY";
/// A release is held by another in-flight operation
pub const RELEASE_LOCKED: &str = "RELEASE_LOCKED";
/// A failed release did not recover after one repair
pub const RELEASE_REPAIR_FAILED: &str = "RELEASE_REPAIR_FAILED";
/// Created capacity did not produce Ready nodes within the grace period
pub const CAPACITY_NOT_READY: &str = "CAPACITY_NOT_READY";

/// Pods of a phase did not become Ready in time
pub const PODS_NOT_READY: &str = "PODS_NOT_READY";
/// The control plane of a new cluster did not answer in time
pub const CLUSTER_NOT_READY: &str = "CLUSTER_NOT_READY";
/// A mutation or query failed unexpectedly
pub const EXECUTION_FAILED: &str = "EXECUTION_FAILED";
/// The body finished without blockers but the phase is still unsatisfied
pub const PHASE_INCOMPLETE: &str = "PHASE_INCOMPLETE";
/// Probing the installation state failed
pub const PROBE_FAILED: &str = "PROBE_FAILED";
/// The health gate could not query the cluster
pub const HEALTH_CHECK_FAILED: &str = "HEALTH_CHECK_FAILED";
/// Mutation needs explicit approval
pub const APPROVAL_REQUIRED: &str = "APPROVAL_REQUIRED";
