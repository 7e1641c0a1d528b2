//! Container engine collaborator (docker)

use async_trait::async_trait;
use std::sync::Arc;
use stowaway_core::ImageReference;

use crate::command::{CommandRunner, Invocation, run_checked};
use crate::error::Result;
use crate::registry::Lookup;

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the image's manifest can be fetched from its registry
    async fn inspect_manifest(&self, image: &ImageReference) -> Lookup;

    async fn pull(&self, image: &ImageReference) -> Result<()>;

    async fn tag(&self, source: &ImageReference, target: &ImageReference) -> Result<()>;

    async fn push(&self, image: &ImageReference) -> Result<()>;

    async fn login(&self, registry: &str, username: &str, password: &str) -> Result<()>;

    /// Forget stored credentials; failures are not interesting to callers
    async fn logout(&self, registry: &str);
}

/// `docker` binary adapter
pub struct DockerCli {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    fn invocation(&self) -> Invocation {
        Invocation::new(&self.binary)
    }
}

fn is_missing_manifest(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such manifest") || lower.contains("manifest unknown") || lower.contains("not found")
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn inspect_manifest(&self, image: &ImageReference) -> Lookup {
        let invocation = self
            .invocation()
            .args(["manifest", "inspect"])
            .arg(image.to_string());

        match self.runner.run(&invocation).await {
            Ok(output) if output.is_success() => Lookup::Exists,
            Ok(output) if is_missing_manifest(&output.stderr) => Lookup::NotFound,
            Ok(output) => Lookup::Failed(output.stderr.trim().to_string()),
            Err(e) => Lookup::Failed(e.to_string()),
        }
    }

    async fn pull(&self, image: &ImageReference) -> Result<()> {
        let invocation = self.invocation().arg("pull").arg(image.to_string());
        run_checked(
            self.runner.as_ref(),
            &invocation,
            &format!("Failed to pull image {}", image),
        )
        .await?;
        Ok(())
    }

    async fn tag(&self, source: &ImageReference, target: &ImageReference) -> Result<()> {
        let invocation = self
            .invocation()
            .arg("tag")
            .arg(source.to_string())
            .arg(target.to_string());
        run_checked(
            self.runner.as_ref(),
            &invocation,
            &format!("Failed to tag image {} to {}", source, target),
        )
        .await?;
        Ok(())
    }

    async fn push(&self, image: &ImageReference) -> Result<()> {
        let invocation = self.invocation().arg("push").arg(image.to_string());
        run_checked(
            self.runner.as_ref(),
            &invocation,
            &format!("Failed to push image {}", image),
        )
        .await?;
        Ok(())
    }

    async fn login(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let invocation = self
            .invocation()
            .args(["login", "--username", username, "--password-stdin", registry])
            .stdin(password);
        run_checked(
            self.runner.as_ref(),
            &invocation,
            &format!("Failed to log in to {}", registry),
        )
        .await?;
        Ok(())
    }

    async fn logout(&self, registry: &str) {
        let invocation = self.invocation().args(["logout", registry]);
        if let Err(e) = self.runner.run(&invocation).await {
            tracing::debug!(registry, error = %e, "logout failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::mock::ScriptedRunner;

    fn image(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_inspect_manifest_classification() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "docker manifest inspect docker.io/gone:1",
            CommandOutput::failure(1, "no such manifest: docker.io/gone:1"),
        );
        runner.respond(
            "docker manifest inspect docker.io/denied:1",
            CommandOutput::failure(1, "unauthorized: authentication required"),
        );
        let docker = DockerCli::new("docker", runner);

        assert_eq!(docker.inspect_manifest(&image("docker.io/ok:1")).await, Lookup::Exists);
        assert_eq!(docker.inspect_manifest(&image("docker.io/gone:1")).await, Lookup::NotFound);
        assert_eq!(
            docker.inspect_manifest(&image("docker.io/denied:1")).await,
            Lookup::Failed("unauthorized: authentication required".to_string())
        );
    }

    #[tokio::test]
    async fn test_tag_and_push_arguments() {
        let runner = Arc::new(ScriptedRunner::new());
        let docker = DockerCli::new("docker", runner.clone());
        let public = image("quay.io/jetstack/cert-manager-controller:v1.14.0");
        let private = public.mirrored_into("123.dkr.ecr.eu-west-1.amazonaws.com", "cert-manager");

        docker.tag(&public, &private).await.unwrap();
        docker.push(&private).await.unwrap();

        assert_eq!(
            runner.invocations(),
            vec![
                "docker tag quay.io/jetstack/cert-manager-controller:v1.14.0 123.dkr.ecr.eu-west-1.amazonaws.com/cert-manager/cert-manager-controller:v1.14.0",
                "docker push 123.dkr.ecr.eu-west-1.amazonaws.com/cert-manager/cert-manager-controller:v1.14.0",
            ]
        );
    }

    #[tokio::test]
    async fn test_logout_swallows_failures() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("docker logout", CommandOutput::failure(1, "not logged in"));
        let docker = DockerCli::new("docker", runner.clone());
        docker.logout("public.ecr.aws").await;
        assert_eq!(runner.invocations(), vec!["docker logout public.ecr.aws"]);
    }
}
