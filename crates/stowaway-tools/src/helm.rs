//! Package manager collaborator (helm)

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use stowaway_core::ChartSource;

use crate::command::{CommandRunner, Invocation, run_checked};
use crate::error::{Result, ToolError};

/// Fields of `Chart.yaml` the pipeline cares about
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub version: String,
    #[serde(default)]
    pub app_version: Option<String>,
}

/// Versions such as `2.1` are written unquoted in the wild
fn scalar_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = serde_yaml::Value::deserialize(deserializer)?;
    stowaway_core::document::scalar_to_string(&value)
        .ok_or_else(|| serde::de::Error::custom("expected a scalar version"))
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Chart metadata for `version`, or the newest version when `None`
    async fn show_chart(&self, source: &ChartSource, version: Option<&str>) -> Result<ChartMetadata>;

    /// Download the packaged chart into `destination`
    async fn pull(&self, source: &ChartSource, version: &str, destination: &Path) -> Result<()>;

    /// Render templates, returning the multi-document stream
    async fn template(&self, chart: &Path, set: &IndexMap<String, String>) -> Result<String>;

    /// Push a packaged chart to `oci://<registry>`
    async fn push(&self, archive: &Path, registry: &str) -> Result<()>;

    async fn registry_login(&self, registry: &str, username: &str, password: &str) -> Result<()>;
}

/// `helm` binary adapter
pub struct HelmCli {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl HelmCli {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    fn invocation(&self) -> Invocation {
        Invocation::new(&self.binary)
    }

    /// Chart argument(s) for a source: the OCI reference, or `<chart> --repo <url>`
    fn source_args(source: &ChartSource) -> Vec<String> {
        match source {
            ChartSource::Oci { reference, .. } => vec![reference.clone()],
            ChartSource::Repository { url, chart } => {
                vec![chart.clone(), "--repo".to_string(), url.clone()]
            }
        }
    }
}

#[async_trait]
impl PackageManager for HelmCli {
    async fn show_chart(&self, source: &ChartSource, version: Option<&str>) -> Result<ChartMetadata> {
        let mut invocation = self
            .invocation()
            .args(["show", "chart"])
            .args(Self::source_args(source));
        if let Some(version) = version {
            invocation = invocation.args(["--version", version]);
        }

        let output = run_checked(self.runner.as_ref(), &invocation, "Failed to fetch chart details").await?;
        serde_yaml::from_str(&output.stdout).map_err(|e| ToolError::UnexpectedOutput {
            command: invocation.command_line(),
            message: format!("invalid chart metadata: {}", e),
        })
    }

    async fn pull(&self, source: &ChartSource, version: &str, destination: &Path) -> Result<()> {
        let invocation = self
            .invocation()
            .arg("pull")
            .args(Self::source_args(source))
            .args(["--version", version])
            .arg("--destination")
            .arg(destination.to_string_lossy());

        let message = match source {
            ChartSource::Oci { .. } => "Failed to pull chart from OCI registry",
            ChartSource::Repository { .. } => "Failed to pull chart",
        };
        run_checked(self.runner.as_ref(), &invocation, message).await?;
        Ok(())
    }

    async fn template(&self, chart: &Path, set: &IndexMap<String, String>) -> Result<String> {
        let mut invocation = self.invocation().arg("template").arg(chart.to_string_lossy());
        for (key, value) in set {
            invocation = invocation.arg("--set").arg(format!("{}={}", key, value));
        }

        let output = run_checked(self.runner.as_ref(), &invocation, "Failed to get images").await?;
        Ok(output.stdout)
    }

    async fn push(&self, archive: &Path, registry: &str) -> Result<()> {
        let invocation = self
            .invocation()
            .arg("push")
            .arg(archive.to_string_lossy())
            .arg(format!("oci://{}", registry));
        run_checked(self.runner.as_ref(), &invocation, "Failed to push chart to ECR").await?;
        Ok(())
    }

    async fn registry_login(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let invocation = self
            .invocation()
            .args(["registry", "login", "--username", username, "--password-stdin", registry])
            .stdin(password);
        run_checked(self.runner.as_ref(), &invocation, "Failed to log in to chart registry").await?;
        Ok(())
    }
}
