//! Vulnerability scanner collaborator (trivy)

use async_trait::async_trait;
use std::sync::Arc;
use stowaway_core::ImageReference;

use crate::command::{CommandRunner, Invocation};
use crate::error::Result;

/// Result of scanning one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Pass,
    Fail { detail: String, output: String },
}

#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan `image`, failing on findings at `severity`
    ///
    /// An `Err` means the scanner could not be run at all.
    async fn scan(&self, image: &ImageReference, severity: &str) -> Result<ScanVerdict>;
}

/// `trivy` binary adapter
pub struct TrivyCli {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl TrivyCli {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }
}

#[async_trait]
impl Scanner for TrivyCli {
    async fn scan(&self, image: &ImageReference, severity: &str) -> Result<ScanVerdict> {
        let invocation = Invocation::new(&self.binary)
            .args(["image", "--exit-code", "1", "--severity", severity])
            .arg(image.to_string());

        let output = self.runner.run(&invocation).await?;
        if output.is_success() {
            tracing::debug!(image = %image, "scan passed");
            return Ok(ScanVerdict::Pass);
        }

        let detail = match output.stderr.trim() {
            "" => format!("{} findings reported", severity),
            stderr => stderr.to_string(),
        };
        Ok(ScanVerdict::Fail {
            detail,
            output: output.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::mock::ScriptedRunner;

    #[tokio::test]
    async fn test_scan_verdicts() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "trivy image --exit-code 1 --severity CRITICAL docker.io/vulnerable:1",
            CommandOutput {
                code: Some(1),
                stdout: "CVE-2024-0001 CRITICAL".to_string(),
                stderr: String::new(),
            },
        );
        let trivy = TrivyCli::new("trivy", runner);

        let clean = ImageReference::parse("docker.io/clean:1").unwrap();
        assert_eq!(trivy.scan(&clean, "CRITICAL").await.unwrap(), ScanVerdict::Pass);

        let vulnerable = ImageReference::parse("docker.io/vulnerable:1").unwrap();
        assert_eq!(
            trivy.scan(&vulnerable, "CRITICAL").await.unwrap(),
            ScanVerdict::Fail {
                detail: "CRITICAL findings reported".to_string(),
                output: "CVE-2024-0001 CRITICAL".to_string(),
            }
        );
    }
}
