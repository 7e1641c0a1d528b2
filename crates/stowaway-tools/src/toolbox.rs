//! The set of collaborators a mirror run works with

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::command::{CommandRunner, ProcessRunner};
use crate::engine::{ContainerEngine, DockerCli};
use crate::helm::{HelmCli, PackageManager};
use crate::registry::{AwsCli, RegistryApi};
use crate::scanner::{Scanner, TrivyCli};

/// Names (or paths) of the external binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolBinaries {
    pub helm: String,
    pub docker: String,
    pub aws: String,
    pub trivy: String,
}

impl Default for ToolBinaries {
    fn default() -> Self {
        Self {
            helm: "helm".to_string(),
            docker: "docker".to_string(),
            aws: "aws".to_string(),
            trivy: "trivy".to_string(),
        }
    }
}

/// Shared handles to every collaborator
#[derive(Clone)]
pub struct Toolbox {
    pub package_manager: Arc<dyn PackageManager>,
    pub engine: Arc<dyn ContainerEngine>,
    pub registry: Arc<dyn RegistryApi>,
    pub scanner: Arc<dyn Scanner>,
}

impl Toolbox {
    /// Adapters over the real binaries
    pub fn cli(binaries: &ToolBinaries, region: Option<String>) -> Self {
        Self::with_runner(binaries, region, Arc::new(ProcessRunner))
    }

    /// Adapters over the given runner
    pub fn with_runner(binaries: &ToolBinaries, region: Option<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            package_manager: Arc::new(HelmCli::new(&binaries.helm, runner.clone())),
            engine: Arc::new(DockerCli::new(&binaries.docker, runner.clone())),
            registry: Arc::new(AwsCli::new(&binaries.aws, runner.clone(), region)),
            scanner: Arc::new(TrivyCli::new(&binaries.trivy, runner)),
        }
    }
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbox").finish_non_exhaustive()
    }
}
