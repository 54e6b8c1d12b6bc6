//! Common types for lakeforge: configuration, errors and Kubernetes helpers

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod retry;

pub use config::{
    ExecutionConfig, IngressRoute, ReleaseConfig, ReleaseGroupConfig, SatisfactionPolicy,
    StackConfig, Timeouts, Transport,
};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding cluster DNS and the storage provisioner
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Name of the cluster DNS deployment checked by the health gate
pub const CORE_DNS_DEPLOYMENT: &str = "coredns";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "lakeforge";

/// Label applied to every object lakeforge creates
pub const MANAGED_BY_LABEL: (&str, &str) = ("app.kubernetes.io/managed-by", "lakeforge");
