//! Install context threaded through every component.

use std::sync::Arc;

use lakeforge_common::StackConfig;

use crate::clients::{ClusterFacts, MutationClient, ProvisioningClient, ReleaseManager};

/// Collaborators and configuration for one orchestrator invocation
#[derive(Clone)]
pub struct InstallContext {
    /// Stack configuration, including execution mode and timeouts
    pub config: Arc<StackConfig>,
    /// Read-only cluster queries (trait object for testability)
    pub facts: Arc<dyn ClusterFacts>,
    /// Cluster mutations
    pub mutations: Arc<dyn MutationClient>,
    /// Release management
    pub releases: Arc<dyn ReleaseManager>,
    /// Cloud provisioning
    pub provisioner: Arc<dyn ProvisioningClient>,
    /// Whether the caller approved mutation for this invocation
    pub approved: bool,
}

impl InstallContext {
    /// Create a builder for constructing a context
    pub fn builder(config: StackConfig) -> ContextBuilder {
        ContextBuilder::new(config)
    }
}

/// Builder for [`InstallContext`]
pub struct ContextBuilder {
    config: StackConfig,
    facts: Option<Arc<dyn ClusterFacts>>,
    mutations: Option<Arc<dyn MutationClient>>,
    releases: Option<Arc<dyn ReleaseManager>>,
    provisioner: Option<Arc<dyn ProvisioningClient>>,
    approved: bool,
}

impl ContextBuilder {
    fn new(config: StackConfig) -> Self {
        Self {
            config,
            facts: None,
            mutations: None,
            releases: None,
            provisioner: None,
            approved: false,
        }
    }

    /// Set the cluster facts client
    pub fn facts(mut self, facts: Arc<dyn ClusterFacts>) -> Self {
        self.facts = Some(facts);
        self
    }

    /// Set the mutation client
    pub fn mutations(mut self, mutations: Arc<dyn MutationClient>) -> Self {
        self.mutations = Some(mutations);
        self
    }

    /// Set the release manager
    pub fn releases(mut self, releases: Arc<dyn ReleaseManager>) -> Self {
        self.releases = Some(releases);
        self
    }

    /// Set the provisioning client
    pub fn provisioner(mut self, provisioner: Arc<dyn ProvisioningClient>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Approve mutation for this invocation
    pub fn approved(mut self, approved: bool) -> Self {
        self.approved = approved;
        self
    }

    /// Build the context; every collaborator is required
    pub fn build(self) -> lakeforge_common::Result<InstallContext> {
        let missing = |name: &str| {
            lakeforge_common::Error::config(format!("install context is missing the {} client", name))
        };
        Ok(InstallContext {
            config: Arc::new(self.config),
            facts: self.facts.ok_or_else(|| missing("cluster facts"))?,
            mutations: self.mutations.ok_or_else(|| missing("mutation"))?,
            releases: self.releases.ok_or_else(|| missing("release"))?,
            provisioner: self.provisioner.ok_or_else(|| missing("provisioning"))?,
            approved: self.approved,
        })
    }
}
