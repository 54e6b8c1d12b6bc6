//! Production implementations of the lakeforge client traits
//!
//! - [`KubeFacts`] / [`KubeMutator`]: kube-rs dynamic API with server-side apply
//! - [`HelmReleases`]: helm CLI
//! - [`AwsProvisioner`]: `eksctl` and `aws` CLIs
//!
//! Every command-line backend runs through one [`CommandRunner`] built from
//! the configured transport.

pub mod aws;
pub mod cluster;
pub mod command;
pub mod helm;

use std::path::PathBuf;
use std::sync::Arc;

use lakeforge_common::{Result, StackConfig};
use lakeforge_install::InstallContext;

pub use aws::AwsProvisioner;
pub use cluster::{KubeConnection, KubeFacts, KubeMutator};
pub use command::{CommandOutput, CommandRunner, ProcessRunner};
pub use helm::HelmReleases;

/// Build an install context wired to the real backends
///
/// Nothing is contacted here; the kube client connects on first use.
pub fn install_context(
    config: StackConfig,
    kubeconfig: Option<PathBuf>,
    approved: bool,
) -> Result<InstallContext> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(config.execution.transport.clone()));
    let connection = Arc::new(KubeConnection::lazy(kubeconfig));
    let mutator = KubeMutator::new(
        connection.clone(),
        runner.clone(),
        config.cluster.name.as_str(),
        config.cluster.region.as_str(),
    );

    InstallContext::builder(config)
        .facts(Arc::new(KubeFacts::new(connection)))
        .mutations(Arc::new(mutator))
        .releases(Arc::new(HelmReleases::new(runner.clone())))
        .provisioner(Arc::new(AwsProvisioner::new(runner)))
        .approved(approved)
        .build()
}
