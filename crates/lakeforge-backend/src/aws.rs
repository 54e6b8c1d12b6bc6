//! Cloud provisioning through the `eksctl` and `aws` CLIs.
//!
//! Creation is idempotent: an "already exists" answer counts as success.
//! Existence checks map the CLI's not-found errors to `false` and keep every
//! other failure an error, so throttling never reads as absence.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use lakeforge_common::retry::{retry_with_backoff, RetryConfig};
use lakeforge_common::Error;
use lakeforge_install::clients::{CloudResource, PolicyRef, ProvisioningClient};

use crate::command::{args, CommandOutput, CommandRunner};

const AWS: &str = "aws";
const EKSCTL: &str = "eksctl";

/// Region where S3 rejects an explicit location constraint
const DEFAULT_S3_REGION: &str = "us-east-1";

const NOT_FOUND_MARKERS: &[&str] = &[
    "ResourceNotFoundException",
    "NoSuchEntity",
    "NonExistentQueue",
    "Not Found",
    "(404)",
];

const ALREADY_EXISTS_MARKERS: &[&str] = &[
    "AlreadyExists",
    "already exists",
    "BucketAlreadyOwnedByYou",
    "EntityAlreadyExists",
];

/// `eksctl`/`aws`-backed [`ProvisioningClient`]
pub struct AwsProvisioner {
    runner: Arc<dyn CommandRunner>,
    retry: RetryConfig,
}

impl AwsProvisioner {
    /// Create a provisioner running commands through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy for individual cloud calls
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run a command, treating outputs matching `accept` as success
    async fn run_accepting(
        &self,
        operation: &str,
        program: &str,
        argv: &[String],
        accept: &[&str],
    ) -> Result<CommandOutput, Error> {
        retry_with_backoff(&self.retry, operation, || async {
            let output = self.runner.run(program, argv, None).await?;
            if output.success() || output.stderr_contains(accept) {
                Ok(output)
            } else {
                Err(Error::command(program, output.stderr.trim().to_string()))
            }
        })
        .await
    }

    async fn exists(&self, operation: &str, program: &str, argv: &[String]) -> Result<bool, Error> {
        let output = self
            .run_accepting(operation, program, argv, NOT_FOUND_MARKERS)
            .await?;
        Ok(output.success())
    }

    async fn find_policy(&self, name: &str) -> Result<Option<String>, Error> {
        let query = format!("Policies[?PolicyName=='{}'].Arn | [0]", name);
        let argv = args(&[
            "iam",
            "list-policies",
            "--scope",
            "Local",
            "--query",
            query.as_str(),
            "--output",
            "text",
        ]);
        let output = self.run_accepting("aws iam list-policies", AWS, &argv, &[]).await?;
        Ok(parse_arn(&output.stdout))
    }
}

/// ARN printed by `--output text`, which renders a missing value as `None`
fn parse_arn(stdout: &str) -> Option<String> {
    let arn = stdout.trim();
    if arn.is_empty() || arn == "None" {
        None
    } else {
        Some(arn.to_string())
    }
}

fn create_command(resource: &CloudResource) -> Result<(&'static str, Vec<String>), Error> {
    let command = match resource {
        CloudResource::Cluster {
            name,
            region,
            version,
        } => (
            EKSCTL,
            args(&[
                "create",
                "cluster",
                "--name",
                name.as_str(),
                "--region",
                region.as_str(),
                "--version",
                version.as_str(),
                "--without-nodegroup",
                "--with-oidc",
            ]),
        ),
        CloudResource::NodeGroup {
            cluster,
            name,
            region,
            instance_type,
            min_size,
            max_size,
            desired_size,
        } => (
            EKSCTL,
            args(&[
                "create",
                "nodegroup",
                "--cluster",
                cluster.as_str(),
                "--name",
                name.as_str(),
                "--region",
                region.as_str(),
                "--node-type",
                instance_type.as_str(),
                "--nodes",
                desired_size.to_string().as_str(),
                "--nodes-min",
                min_size.to_string().as_str(),
                "--nodes-max",
                max_size.to_string().as_str(),
                "--managed",
            ]),
        ),
        CloudResource::Bucket { name, region } => {
            let mut argv = args(&[
                "s3api",
                "create-bucket",
                "--bucket",
                name.as_str(),
                "--region",
                region.as_str(),
            ]);
            if region != DEFAULT_S3_REGION {
                argv.push("--create-bucket-configuration".to_string());
                argv.push(format!("LocationConstraint={}", region));
            }
            (AWS, argv)
        }
        CloudResource::Queue { name, region } => (
            AWS,
            args(&[
                "sqs",
                "create-queue",
                "--queue-name",
                name.as_str(),
                "--region",
                region.as_str(),
            ]),
        ),
        CloudResource::Policy { name } => {
            return Err(Error::validation(format!(
                "policy {} needs a document; use create_policy",
                name
            )))
        }
    };
    Ok(command)
}

fn head_command(resource: &CloudResource) -> Option<(&'static str, Vec<String>)> {
    match resource {
        CloudResource::Cluster { name, region, .. } => Some((
            AWS,
            args(&["eks", "describe-cluster", "--name", name.as_str(), "--region", region.as_str()]),
        )),
        CloudResource::NodeGroup {
            cluster,
            name,
            region,
            ..
        } => Some((
            AWS,
            args(&[
                "eks",
                "describe-nodegroup",
                "--cluster-name",
                cluster.as_str(),
                "--nodegroup-name",
                name.as_str(),
                "--region",
                region.as_str(),
            ]),
        )),
        CloudResource::Bucket { name, .. } => {
            Some((AWS, args(&["s3api", "head-bucket", "--bucket", name.as_str()])))
        }
        CloudResource::Queue { name, region } => Some((
            AWS,
            args(&["sqs", "get-queue-url", "--queue-name", name.as_str(), "--region", region.as_str()]),
        )),
        CloudResource::Policy { .. } => None,
    }
}

#[async_trait]
impl ProvisioningClient for AwsProvisioner {
    async fn create_resource(&self, resource: &CloudResource) -> Result<(), Error> {
        let (program, argv) = create_command(resource)?;
        info!(resource = %resource, "creating cloud resource");
        let output = self
            .run_accepting(&format!("create {}", resource.kind()), program, &argv, ALREADY_EXISTS_MARKERS)
            .await
            .map_err(|e| Error::provision(resource.to_string(), e.to_string()))?;
        if !output.success() {
            debug!(resource = %resource, "resource already exists");
        }
        Ok(())
    }

    async fn head_resource(&self, resource: &CloudResource) -> Result<bool, Error> {
        let exists = match head_command(resource) {
            Some((program, argv)) => {
                self.exists(&format!("head {}", resource.kind()), program, &argv)
                    .await?
            }
            None => self.find_policy(resource.name()).await?.is_some(),
        };
        debug!(resource = %resource, exists, "checked cloud resource");
        Ok(exists)
    }

    async fn create_policy(&self, name: &str, document: &Value) -> Result<PolicyRef, Error> {
        if let Some(arn) = self.find_policy(name).await? {
            return Ok(PolicyRef { arn, existed: true });
        }

        let document = serde_json::to_string(document)?;
        let argv = args(&[
            "iam",
            "create-policy",
            "--policy-name",
            name,
            "--policy-document",
            document.as_str(),
            "--query",
            "Policy.Arn",
            "--output",
            "text",
        ]);
        info!(policy = %name, "creating policy");
        let output = self
            .run_accepting("aws iam create-policy", AWS, &argv, &["EntityAlreadyExists"])
            .await
            .map_err(|e| Error::provision(format!("policy {}", name), e.to_string()))?;

        if let Some(arn) = parse_arn(&output.stdout) {
            return Ok(PolicyRef { arn, existed: false });
        }
        // Created concurrently between the lookup and the create
        let arn = self
            .find_policy(name)
            .await?
            .ok_or_else(|| Error::provision(format!("policy {}", name), "policy ARN not reported"))?;
        Ok(PolicyRef { arn, existed: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockCommandRunner;
    use mockall::Sequence;
    use rstest::rstest;
    use serde_json::json;

    fn provisioner(runner: MockCommandRunner) -> AwsProvisioner {
        AwsProvisioner::new(Arc::new(runner)).with_retry(RetryConfig::once())
    }

    fn bucket(region: &str) -> CloudResource {
        CloudResource::Bucket {
            name: "analytics-datalake".to_string(),
            region: region.to_string(),
        }
    }

    #[rstest]
    #[case("us-east-1", false)]
    #[case("eu-west-1", true)]
    fn bucket_location_constraint(#[case] region: &str, #[case] constrained: bool) {
        let (program, argv) = create_command(&bucket(region)).unwrap();
        assert_eq!(program, "aws");
        assert_eq!(argv.contains(&"--create-bucket-configuration".to_string()), constrained);
    }

    #[test]
    fn cluster_is_created_without_nodes() {
        let (program, argv) = create_command(&CloudResource::Cluster {
            name: "analytics".to_string(),
            region: "eu-west-1".to_string(),
            version: "1.31".to_string(),
        })
        .unwrap();
        assert_eq!(program, "eksctl");
        assert!(argv.contains(&"--without-nodegroup".to_string()));
    }

    #[test]
    fn policy_creation_needs_a_document() {
        let err = create_command(&CloudResource::Policy {
            name: "p".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[rstest]
    #[case("An error occurred (ResourceNotFoundException) when calling DescribeCluster")]
    #[case("An error occurred (404) when calling the HeadBucket operation: Not Found")]
    #[case("An error occurred (AWS.SimpleQueueService.NonExistentQueue)")]
    #[tokio::test]
    async fn not_found_is_absence(#[case] stderr: &'static str) {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(move |_, _, _| Ok(CommandOutput::failed(stderr)));
        assert!(!provisioner(runner).head_resource(&bucket("eu-west-1")).await.unwrap());
    }

    #[tokio::test]
    async fn throttling_is_not_absence() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _, _| Ok(CommandOutput::failed("An error occurred (Throttling): Rate exceeded")));
        assert!(provisioner(runner).head_resource(&bucket("eu-west-1")).await.is_err());
    }

    #[tokio::test]
    async fn existing_bucket_is_created_successfully() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|_, _, _| {
            Ok(CommandOutput::failed("An error occurred (BucketAlreadyOwnedByYou)"))
        });
        provisioner(runner).create_resource(&bucket("eu-west-1")).await.unwrap();
    }

    #[tokio::test]
    async fn existing_policy_is_reused() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, argv, _| argv.contains(&"list-policies".to_string()))
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::ok("arn:aws:iam::123456789012:policy/access\n")));

        let policy = provisioner(runner)
            .create_policy("access", &json!({"Version": "2012-10-17"}))
            .await
            .unwrap();
        assert!(policy.existed);
        assert_eq!(policy.arn, "arn:aws:iam::123456789012:policy/access");
    }

    #[tokio::test]
    async fn missing_policy_is_created() {
        let mut seq = Sequence::new();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, argv, _| argv.contains(&"list-policies".to_string()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(CommandOutput::ok("None\n")));
        runner
            .expect_run()
            .withf(|_, argv, _| argv.contains(&"create-policy".to_string()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(CommandOutput::ok("arn:aws:iam::123456789012:policy/access\n")));

        let policy = provisioner(runner)
            .create_policy("access", &json!({"Version": "2012-10-17"}))
            .await
            .unwrap();
        assert!(!policy.existed);
    }
}
