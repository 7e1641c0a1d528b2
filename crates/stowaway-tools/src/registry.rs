//! Cloud registry collaborator (AWS ECR through the `aws` CLI)

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::command::{CommandRunner, Invocation, run_checked};
use crate::error::{Result, ToolError};

/// Outcome of an existence check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Exists,
    NotFound,
    /// The check itself failed; carries the tool's explanation
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Which registry a login password is requested for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The public gallery, whose API lives in a fixed region
    Public { region: String },
    Private,
}

#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// `<account>.dkr.ecr.<region>.amazonaws.com`
    async fn private_registry_url(&self) -> Result<String>;

    async fn describe_repository(&self, name: &str) -> Lookup;

    async fn create_repository(&self, name: &str) -> Result<CreateOutcome>;

    /// Whether `repository` holds an image tagged `tag`
    async fn describe_image(&self, repository: &str, tag: &str) -> Lookup;

    async fn login_password(&self, scope: &Scope) -> Result<String>;
}

const REPOSITORY_NOT_FOUND: &str = "RepositoryNotFoundException";
const IMAGE_NOT_FOUND: &str = "ImageNotFoundException";
const REPOSITORY_EXISTS: &str = "RepositoryAlreadyExistsException";

/// `aws` binary adapter
pub struct AwsCli {
    binary: String,
    runner: Arc<dyn CommandRunner>,
    configured_region: Option<String>,
    region: OnceCell<String>,
}

impl AwsCli {
    /// `region` overrides the CLI's configured default region
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>, region: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            runner,
            configured_region: region.filter(|r| !r.is_empty()),
            region: OnceCell::new(),
        }
    }

    fn invocation(&self) -> Invocation {
        Invocation::new(&self.binary)
    }

    async fn region(&self) -> Result<&str> {
        let region = self
            .region
            .get_or_try_init(|| async {
                if let Some(region) = &self.configured_region {
                    return Ok(region.clone());
                }
                let invocation = self.invocation().args(["configure", "get", "region"]);
                let output =
                    run_checked(self.runner.as_ref(), &invocation, "Failed to read configured region").await?;
                let region = output.stdout.trim().to_string();
                if region.is_empty() {
                    return Err(ToolError::UnexpectedOutput {
                        command: invocation.command_line(),
                        message: "no region configured".to_string(),
                    });
                }
                Ok::<_, ToolError>(region)
            })
            .await?;
        Ok(region)
    }

    async fn lookup(&self, invocation: Invocation, not_found: &[&str]) -> Lookup {
        match self.runner.run(&invocation).await {
            Ok(output) if output.is_success() => Lookup::Exists,
            Ok(output) if not_found.iter().any(|code| output.stderr.contains(code)) => Lookup::NotFound,
            Ok(output) => Lookup::Failed(output.stderr.trim().to_string()),
            Err(e) => Lookup::Failed(e.to_string()),
        }
    }
}

#[async_trait]
impl RegistryApi for AwsCli {
    async fn private_registry_url(&self) -> Result<String> {
        let invocation = self
            .invocation()
            .args(["sts", "get-caller-identity", "--query", "Account", "--output", "text"]);
        let output = run_checked(self.runner.as_ref(), &invocation, "Unable to get caller identity").await?;

        let account = output.stdout.trim();
        if account.is_empty() || !account.chars().all(|c| c.is_ascii_digit()) {
            return Err(ToolError::UnexpectedOutput {
                command: invocation.command_line(),
                message: format!("invalid account id '{}'", account),
            });
        }

        let region = self.region().await?;
        Ok(format!("{}.dkr.ecr.{}.amazonaws.com", account, region))
    }

    async fn describe_repository(&self, name: &str) -> Lookup {
        let region = match self.region().await {
            Ok(region) => region.to_string(),
            Err(e) => return Lookup::Failed(e.to_string()),
        };
        let invocation = self
            .invocation()
            .args(["ecr", "describe-repositories", "--repository-names", name])
            .args(["--region", region.as_str()]);
        self.lookup(invocation, &[REPOSITORY_NOT_FOUND]).await
    }

    async fn create_repository(&self, name: &str) -> Result<CreateOutcome> {
        let region = self.region().await?.to_string();
        let invocation = self
            .invocation()
            .args(["ecr", "create-repository", "--repository-name", name])
            .args(["--region", region.as_str()]);

        match run_checked(self.runner.as_ref(), &invocation, "Unable to create ECR repository").await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e) if e.stderr().contains(REPOSITORY_EXISTS) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    async fn describe_image(&self, repository: &str, tag: &str) -> Lookup {
        let region = match self.region().await {
            Ok(region) => region.to_string(),
            Err(e) => return Lookup::Failed(e.to_string()),
        };
        let image_id = format!("imageTag={}", tag);
        let invocation = self
            .invocation()
            .args(["ecr", "describe-images", "--repository-name", repository])
            .args(["--image-ids", image_id.as_str()])
            .args(["--region", region.as_str()]);
        self.lookup(invocation, &[IMAGE_NOT_FOUND, REPOSITORY_NOT_FOUND]).await
    }

    async fn login_password(&self, scope: &Scope) -> Result<String> {
        let invocation = match scope {
            Scope::Public { region } => self
                .invocation()
                .args(["ecr-public", "get-login-password", "--region", region.as_str()]),
            Scope::Private => {
                let region = self.region().await?.to_string();
                self.invocation()
                    .args(["ecr", "get-login-password", "--region", region.as_str()])
            }
        };

        let output = run_checked(self.runner.as_ref(), &invocation, "Failed to fetch registry password").await?;
        let password = output.stdout.trim().to_string();
        if password.is_empty() {
            return Err(ToolError::UnexpectedOutput {
                command: invocation.command_line(),
                message: "empty password".to_string(),
            });
        }
        Ok(password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::mock::ScriptedRunner;

    fn aws(runner: Arc<ScriptedRunner>, region: Option<&str>) -> AwsCli {
        AwsCli::new("aws", runner, region.map(String::from))
    }

    #[tokio::test]
    async fn test_private_registry_url_uses_configured_region() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("aws sts get-caller-identity", CommandOutput::success("123456789012\n"));
        runner.respond("aws configure get region", CommandOutput::success("eu-west-1\n"));

        let url = aws(runner.clone(), None).private_registry_url().await.unwrap();
        assert_eq!(url, "123456789012.dkr.ecr.eu-west-1.amazonaws.com");

        let url = aws(runner, Some("us-west-2")).private_registry_url().await.unwrap();
        assert_eq!(url, "123456789012.dkr.ecr.us-west-2.amazonaws.com");
    }

    #[tokio::test]
    async fn test_private_registry_url_rejects_garbage() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("aws sts get-caller-identity", CommandOutput::success("None\n"));
        assert!(aws(runner, Some("eu-west-1")).private_registry_url().await.is_err());
    }

    #[tokio::test]
    async fn test_describe_lookups() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "aws ecr describe-repositories --repository-names web/nginx",
            CommandOutput::failure(254, "An error occurred (RepositoryNotFoundException)"),
        );
        runner.respond(
            "aws ecr describe-images --repository-name web",
            CommandOutput::failure(254, "An error occurred (ImageNotFoundException)"),
        );
        runner.respond(
            "aws ecr describe-repositories --repository-names locked",
            CommandOutput::failure(254, "An error occurred (AccessDeniedException)"),
        );
        let aws = aws(runner, Some("eu-west-1"));

        assert_eq!(aws.describe_repository("web/nginx").await, Lookup::NotFound);
        assert_eq!(aws.describe_repository("web/other").await, Lookup::Exists);
        assert!(matches!(aws.describe_repository("locked").await, Lookup::Failed(_)));
        assert_eq!(aws.describe_image("web", "1.0.0").await, Lookup::NotFound);
    }

    #[tokio::test]
    async fn test_create_repository_tolerates_existing() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "aws ecr create-repository --repository-name web/nginx",
            CommandOutput::failure(254, "An error occurred (RepositoryAlreadyExistsException)"),
        );
        let aws = aws(runner, Some("eu-west-1"));

        assert_eq!(aws.create_repository("web/nginx").await.unwrap(), CreateOutcome::AlreadyExists);
        assert_eq!(aws.create_repository("web/app").await.unwrap(), CreateOutcome::Created);
    }

    #[tokio::test]
    async fn test_login_password_scopes() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("aws ecr-public get-login-password", CommandOutput::success("public-token\n"));
        runner.respond("aws ecr get-login-password", CommandOutput::success("private-token\n"));
        let aws = aws(runner.clone(), Some("eu-west-1"));

        let public = aws
            .login_password(&Scope::Public {
                region: "us-east-1".to_string(),
            })
            .await
            .unwrap();
        let private = aws.login_password(&Scope::Private).await.unwrap();

        assert_eq!(public, "public-token");
        assert_eq!(private, "private-token");
        assert_eq!(
            runner.invocations(),
            vec![
                "aws ecr-public get-login-password --region us-east-1",
                "aws ecr get-login-password --region eu-west-1",
            ]
        );
    }
}
