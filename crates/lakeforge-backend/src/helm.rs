//! Release management through the helm CLI.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use lakeforge_common::retry::{retry_with_backoff, RetryConfig};
use lakeforge_common::Error;
use lakeforge_install::clients::{Release, ReleaseManager, ReleaseSpec, ReleaseStatus};

use crate::command::{args, run_checked, CommandRunner};

const HELM: &str = "helm";

/// Entry of `helm list -o json`
#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    // helm prints the revision as a string
    revision: String,
    status: String,
}

/// Helm-backed [`ReleaseManager`]
pub struct HelmReleases {
    runner: Arc<dyn CommandRunner>,
    retry: RetryConfig,
}

impl HelmReleases {
    /// Create a release manager running helm through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy for individual helm calls
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

fn parse_list(stdout: &str) -> Result<Vec<Release>, Error> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<ListEntry> = serde_json::from_str(trimmed)
        .map_err(|e| Error::serialization_for_kind("helm list", e.to_string()))?;
    Ok(entries
        .into_iter()
        .map(|entry| Release {
            revision: entry.revision.parse().unwrap_or(0),
            status: ReleaseStatus::from(entry.status),
            name: entry.name,
        })
        .collect())
}

fn upgrade_args(spec: &ReleaseSpec) -> Vec<String> {
    let mut argv = args(&[
        "upgrade",
        "--install",
        spec.name.as_str(),
        spec.chart.as_str(),
        "--namespace",
        spec.namespace.as_str(),
        "--create-namespace",
    ]);
    if let Some(version) = &spec.version {
        argv.push("--version".to_string());
        argv.push(version.clone());
    }
    // values are read from stdin
    argv.extend(args(&["--values", "-"]));
    argv
}

/// Whether `helm status -o json` reports an operation in flight
fn status_is_pending(stdout: &str) -> Result<bool, Error> {
    let status: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::serialization_for_kind("helm status", e.to_string()))?;
    let raw = status
        .pointer("/info/status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(ReleaseStatus::from(raw.to_string()).is_pending())
}

#[async_trait]
impl ReleaseManager for HelmReleases {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>, Error> {
        let argv = args(&["list", "--namespace", namespace, "--all", "--output", "json"]);
        let output = retry_with_backoff(&self.retry, "helm list", || {
            run_checked(self.runner.as_ref(), HELM, &argv, None)
        })
        .await?;
        let releases = parse_list(&output.stdout)?;
        debug!(namespace = %namespace, count = releases.len(), "listed releases");
        Ok(releases)
    }

    async fn upgrade_install(&self, spec: &ReleaseSpec) -> Result<(), Error> {
        let values = serde_json::to_string(&spec.values)?;
        let argv = upgrade_args(spec);
        info!(release = %spec.name, namespace = %spec.namespace, chart = %spec.chart, "helm upgrade --install");
        run_checked(self.runner.as_ref(), HELM, &argv, Some(values))
            .await
            .map_err(|e| Error::release(&spec.name, &spec.namespace, e.to_string()))?;
        Ok(())
    }

    async fn is_locked(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        let argv = args(&["status", name, "--namespace", namespace, "--output", "json"]);
        let output = retry_with_backoff(&self.retry, "helm status", || async {
            let output = self.runner.run(HELM, &argv, None).await?;
            if output.success() || output.stderr_contains(&["not found"]) {
                Ok(output)
            } else {
                Err(Error::command(HELM, output.stderr.trim().to_string()))
            }
        })
        .await?;
        if !output.success() {
            return Ok(false);
        }
        status_is_pending(&output.stdout)
    }
}
