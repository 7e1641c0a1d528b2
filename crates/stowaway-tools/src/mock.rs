//! In-memory collaborators for testing
//!
//! These stand in for helm, docker, aws and trivy so the pipeline can be
//! exercised without any of them installed. Each mock counts the operations
//! it served for assertions.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use stowaway_core::{ChartSource, ImageReference};

use crate::command::{CommandOutput, CommandRunner, Invocation, diagnose};
use crate::engine::ContainerEngine;
use crate::error::{Result, ToolError};
use crate::helm::{ChartMetadata, PackageManager};
use crate::registry::{CreateOutcome, Lookup, RegistryApi, Scope};
use crate::scanner::{ScanVerdict, Scanner};
use crate::toolbox::Toolbox;

fn command_failed(command: String, message: &str, stderr: &str) -> ToolError {
    ToolError::CommandFailed {
        command,
        message: message.to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
        diagnosis: diagnose(stderr),
    }
}

/// Consume one scheduled failure for `key`, if any remain
fn take_failure(failures: &RwLock<HashMap<String, usize>>, key: &str) -> bool {
    let mut failures = failures.write().unwrap();
    match failures.get_mut(key) {
        Some(0) | None => false,
        Some(remaining) => {
            if *remaining != usize::MAX {
                *remaining -= 1;
            }
            true
        }
    }
}

// ============ ScriptedRunner ============

/// Runner answering from a script of command-line prefixes
///
/// The longest matching prefix wins. A rule with several outputs plays them in
/// order and repeats the last one. Unmatched commands succeed with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: RwLock<Vec<(String, VecDeque<CommandOutput>)>>,
    log: RwLock<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer commands starting with `prefix` with `output`
    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        self.respond_sequence(prefix, vec![output]);
    }

    pub fn respond_sequence(&self, prefix: &str, outputs: Vec<CommandOutput>) {
        let mut rules = self.rules.write().unwrap();
        rules.retain(|(p, _)| p != prefix);
        rules.push((prefix.to_string(), outputs.into()));
    }

    /// Command lines run so far
    pub fn invocations(&self) -> Vec<String> {
        self.log.read().unwrap().iter().map(Invocation::command_line).collect()
    }

    /// Stdin payloads of the commands run so far
    pub fn stdin_payloads(&self) -> Vec<Option<String>> {
        self.log
            .read()
            .unwrap()
            .iter()
            .map(|i| i.stdin_data().map(String::from))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.log.write().unwrap().push(invocation.clone());
        let line = invocation.command_line();

        let mut rules = self.rules.write().unwrap();
        let rule = rules
            .iter_mut()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());

        Ok(match rule {
            Some((_, outputs)) if outputs.len() > 1 => outputs.pop_front().unwrap_or_default(),
            Some((_, outputs)) => outputs.front().cloned().unwrap_or_default(),
            None => CommandOutput::success(""),
        })
    }
}

// ============ MockPackageManager ============

/// A chart known to [`MockPackageManager`]
#[derive(Debug, Clone)]
pub struct MockChart {
    pub name: String,
    /// Available versions, oldest first
    pub versions: Vec<String>,
    pub values: String,
    pub rendered: String,
}

impl MockChart {
    pub fn new(name: &str, versions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            versions: versions.iter().map(|v| v.to_string()).collect(),
            values: String::new(),
            rendered: String::new(),
        }
    }

    pub fn with_values(mut self, values: &str) -> Self {
        self.values = values.to_string();
        self
    }

    pub fn with_rendered(mut self, rendered: &str) -> Self {
        self.rendered = rendered.to_string();
        self
    }

    /// Version helm would report for a request
    fn select(&self, requested: Option<&str>) -> Option<String> {
        let Some(requested) = requested else {
            return self.versions.last().cloned();
        };
        if self.versions.iter().any(|v| v == requested) {
            return Some(requested.to_string());
        }
        let req = semver::VersionReq::parse(requested).ok()?;
        self.versions
            .iter()
            .filter_map(|v| semver::Version::parse(v).ok())
            .filter(|v| req.matches(v))
            .max()
            .map(|v| v.to_string())
    }
}

/// Counts of package manager operations
#[derive(Debug, Default, Clone)]
pub struct PackageManagerCounts {
    pub shows: usize,
    pub pulls: usize,
    pub templates: usize,
    pub pushes: usize,
    pub logins: usize,
}

/// In-memory package manager
#[derive(Default)]
pub struct MockPackageManager {
    charts: RwLock<HashMap<String, MockChart>>,
    pull_writes_archive: RwLock<Option<bool>>,
    failing_templates: RwLock<HashSet<String>>,
    push_failures: RwLock<HashMap<String, usize>>,
    pushed: RwLock<Vec<(PathBuf, String)>>,
    operations: RwLock<PackageManagerCounts>,
}

impl MockPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chart(&self, chart: MockChart) {
        self.charts.write().unwrap().insert(chart.name.clone(), chart);
    }

    /// Make pulls report success without writing anything
    pub fn pull_writes_nothing(&self) {
        *self.pull_writes_archive.write().unwrap() = Some(false);
    }

    pub fn fail_template(&self, chart: &str) {
        self.failing_templates.write().unwrap().insert(chart.to_string());
    }

    /// Fail the next `times` pushes of `chart` (`usize::MAX` for always)
    pub fn fail_push(&self, chart: &str, times: usize) {
        self.push_failures.write().unwrap().insert(chart.to_string(), times);
    }

    /// (archive, registry) pairs pushed so far
    pub fn pushed(&self) -> Vec<(PathBuf, String)> {
        self.pushed.read().unwrap().clone()
    }

    pub fn operation_counts(&self) -> PackageManagerCounts {
        self.operations.read().unwrap().clone()
    }

    fn chart_for(&self, source: &ChartSource) -> Option<MockChart> {
        let name = match source {
            ChartSource::Oci { reference, .. } => reference.rsplit('/').next().unwrap_or(reference),
            ChartSource::Repository { chart, .. } => chart.as_str(),
        };
        self.charts.read().unwrap().get(name).cloned()
    }

    fn chart_for_path(&self, path: &Path) -> Option<MockChart> {
        let file_name = path.file_name()?.to_string_lossy().to_string();
        self.charts
            .read()
            .unwrap()
            .values()
            .find(|c| file_name == c.name || file_name.starts_with(&format!("{}-", c.name)))
            .cloned()
    }
}

#[async_trait]
impl PackageManager for MockPackageManager {
    async fn show_chart(&self, source: &ChartSource, version: Option<&str>) -> Result<ChartMetadata> {
        self.operations.write().unwrap().shows += 1;
        let command = format!("helm show chart {}", source);

        let chart = self
            .chart_for(source)
            .ok_or_else(|| command_failed(command.clone(), "Failed to fetch chart details", "Error: repository not found"))?;
        let version = chart.select(version).ok_or_else(|| {
            command_failed(command, "Failed to fetch chart details", "Error: chart version not found")
        })?;

        Ok(ChartMetadata {
            name: chart.name,
            version,
            app_version: None,
        })
    }

    async fn pull(&self, source: &ChartSource, version: &str, destination: &Path) -> Result<()> {
        self.operations.write().unwrap().pulls += 1;
        let command = format!("helm pull {} --version {}", source, version);

        let chart = self
            .chart_for(source)
            .filter(|c| c.versions.iter().any(|v| v == version))
            .ok_or_else(|| command_failed(command, "Failed to pull chart", "Error: chart not found"))?;

        if *self.pull_writes_archive.read().unwrap() == Some(false) {
            return Ok(());
        }

        let entries = vec![
            (
                format!("{}/Chart.yaml", chart.name),
                format!("apiVersion: v2\nname: {}\nversion: {}\n", chart.name, version).into_bytes(),
            ),
            (format!("{}/values.yaml", chart.name), chart.values.clone().into_bytes()),
        ];
        let archive = destination.join(format!("{}-{}.tgz", chart.name, version));
        stowaway_core::archive::write_archive(&archive, &entries)?;
        Ok(())
    }

    async fn template(&self, chart: &Path, _set: &IndexMap<String, String>) -> Result<String> {
        self.operations.write().unwrap().templates += 1;
        let command = format!("helm template {}", chart.display());

        let mock = self
            .chart_for_path(chart)
            .ok_or_else(|| command_failed(command.clone(), "Failed to get images", "Error: chart not found"))?;
        if self.failing_templates.read().unwrap().contains(&mock.name) {
            return Err(command_failed(
                command,
                "Failed to get images",
                "Error: template: parse error",
            ));
        }
        Ok(mock.rendered)
    }

    async fn push(&self, archive: &Path, registry: &str) -> Result<()> {
        self.operations.write().unwrap().pushes += 1;
        let name = self
            .chart_for_path(archive)
            .map(|c| c.name)
            .unwrap_or_default();
        if take_failure(&self.push_failures, &name) {
            return Err(command_failed(
                format!("helm push {} oci://{}", archive.display(), registry),
                "Failed to push chart to ECR",
                "Error: failed to push: 503 Service Unavailable",
            ));
        }
        self.pushed
            .write()
            .unwrap()
            .push((archive.to_path_buf(), registry.to_string()));
        Ok(())
    }

    async fn registry_login(&self, _registry: &str, _username: &str, _password: &str) -> Result<()> {
        self.operations.write().unwrap().logins += 1;
        Ok(())
    }
}

// ============ MockContainerEngine ============

/// Counts of container engine operations
#[derive(Debug, Default, Clone)]
pub struct EngineCounts {
    pub inspects: usize,
    pub pulls: usize,
    pub tags: usize,
    pub pushes: usize,
    pub logins: usize,
    pub logouts: usize,
}

/// In-memory container engine
#[derive(Default)]
pub struct MockContainerEngine {
    missing: RwLock<HashSet<String>>,
    pull_failures: RwLock<HashMap<String, usize>>,
    push_failures: RwLock<HashMap<String, usize>>,
    login_failures: RwLock<HashSet<String>>,
    pulled: RwLock<Vec<String>>,
    pushed: RwLock<Vec<String>>,
    logged_in: RwLock<Vec<String>>,
    operations: RwLock<EngineCounts>,
}

impl MockContainerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the image's manifest as absent
    pub fn mark_missing(&self, image: &str) {
        self.missing.write().unwrap().insert(image.to_string());
    }

    /// Fail the next `times` pulls of `image` (`usize::MAX` for always)
    pub fn fail_pull(&self, image: &str, times: usize) {
        self.pull_failures.write().unwrap().insert(image.to_string(), times);
    }

    /// Fail the next `times` pushes of the private `image`
    pub fn fail_push(&self, image: &str, times: usize) {
        self.push_failures.write().unwrap().insert(image.to_string(), times);
    }

    pub fn fail_login(&self, registry: &str) {
        self.login_failures.write().unwrap().insert(registry.to_string());
    }

    pub fn pulled(&self) -> Vec<String> {
        self.pulled.read().unwrap().clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.pushed.read().unwrap().clone()
    }

    /// Registries logged into, in order
    pub fn logged_in(&self) -> Vec<String> {
        self.logged_in.read().unwrap().clone()
    }

    pub fn operation_counts(&self) -> EngineCounts {
        self.operations.read().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for MockContainerEngine {
    async fn inspect_manifest(&self, image: &ImageReference) -> Lookup {
        self.operations.write().unwrap().inspects += 1;
        if self.missing.read().unwrap().contains(&image.to_string()) {
            Lookup::NotFound
        } else {
            Lookup::Exists
        }
    }

    async fn pull(&self, image: &ImageReference) -> Result<()> {
        self.operations.write().unwrap().pulls += 1;
        let name = image.to_string();
        if take_failure(&self.pull_failures, &name) {
            return Err(command_failed(
                format!("docker pull {}", name),
                &format!("Failed to pull image {}", name),
                "Error response from daemon: Get https://registry/v2/: net/http: TLS handshake timeout",
            ));
        }
        self.pulled.write().unwrap().push(name);
        Ok(())
    }

    async fn tag(&self, _source: &ImageReference, _target: &ImageReference) -> Result<()> {
        self.operations.write().unwrap().tags += 1;
        Ok(())
    }

    async fn push(&self, image: &ImageReference) -> Result<()> {
        self.operations.write().unwrap().pushes += 1;
        let name = image.to_string();
        if take_failure(&self.push_failures, &name) {
            return Err(command_failed(
                format!("docker push {}", name),
                &format!("Failed to push image {}", name),
                "received unexpected HTTP status: 500 Internal Server Error",
            ));
        }
        self.pushed.write().unwrap().push(name);
        Ok(())
    }

    async fn login(&self, registry: &str, _username: &str, _password: &str) -> Result<()> {
        self.operations.write().unwrap().logins += 1;
        if self.login_failures.read().unwrap().contains(registry) {
            return Err(command_failed(
                format!("docker login {}", registry),
                &format!("Failed to log in to {}", registry),
                "Error response from daemon: login attempt failed",
            ));
        }
        self.logged_in.write().unwrap().push(registry.to_string());
        Ok(())
    }

    async fn logout(&self, _registry: &str) {
        self.operations.write().unwrap().logouts += 1;
    }
}

// ============ MockRegistry ============

/// Counts of registry API operations
#[derive(Debug, Default, Clone)]
pub struct RegistryCounts {
    pub urls: usize,
    pub repository_lookups: usize,
    pub creates: usize,
    pub image_lookups: usize,
    pub passwords: usize,
}

/// In-memory cloud registry
#[derive(Default)]
pub struct MockRegistry {
    url: String,
    repositories: RwLock<HashSet<String>>,
    images: RwLock<HashSet<(String, String)>>,
    broken_repositories: RwLock<HashSet<String>>,
    scopes: RwLock<Vec<Scope>>,
    operations: RwLock<RegistryCounts>,
}

impl MockRegistry {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn add_repository(&self, name: &str) {
        self.repositories.write().unwrap().insert(name.to_string());
    }

    pub fn add_image(&self, repository: &str, tag: &str) {
        self.add_repository(repository);
        self.images
            .write()
            .unwrap()
            .insert((repository.to_string(), tag.to_string()));
    }

    /// Make lookups and creation of `name` fail with an access error
    pub fn break_repository(&self, name: &str) {
        self.broken_repositories.write().unwrap().insert(name.to_string());
    }

    pub fn repositories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repositories.read().unwrap().iter().cloned().collect();
        names.sort();
        names
    }

    /// Scopes passwords were requested for, in order
    pub fn password_scopes(&self) -> Vec<Scope> {
        self.scopes.read().unwrap().clone()
    }

    pub fn operation_counts(&self) -> RegistryCounts {
        self.operations.read().unwrap().clone()
    }
}

#[async_trait]
impl RegistryApi for MockRegistry {
    async fn private_registry_url(&self) -> Result<String> {
        self.operations.write().unwrap().urls += 1;
        Ok(self.url.clone())
    }

    async fn describe_repository(&self, name: &str) -> Lookup {
        self.operations.write().unwrap().repository_lookups += 1;
        if self.broken_repositories.read().unwrap().contains(name) {
            return Lookup::Failed("An error occurred (AccessDeniedException)".to_string());
        }
        if self.repositories.read().unwrap().contains(name) {
            Lookup::Exists
        } else {
            Lookup::NotFound
        }
    }

    async fn create_repository(&self, name: &str) -> Result<CreateOutcome> {
        self.operations.write().unwrap().creates += 1;
        if self.broken_repositories.read().unwrap().contains(name) {
            return Err(command_failed(
                format!("aws ecr create-repository --repository-name {}", name),
                "Unable to create ECR repository",
                "An error occurred (AccessDeniedException)",
            ));
        }
        if self.repositories.write().unwrap().insert(name.to_string()) {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    async fn describe_image(&self, repository: &str, tag: &str) -> Lookup {
        self.operations.write().unwrap().image_lookups += 1;
        if self.broken_repositories.read().unwrap().contains(repository) {
            return Lookup::Failed("An error occurred (AccessDeniedException)".to_string());
        }
        let key = (repository.to_string(), tag.to_string());
        if self.images.read().unwrap().contains(&key) {
            Lookup::Exists
        } else {
            Lookup::NotFound
        }
    }

    async fn login_password(&self, scope: &Scope) -> Result<String> {
        self.operations.write().unwrap().passwords += 1;
        self.scopes.write().unwrap().push(scope.clone());
        Ok(match scope {
            Scope::Public { .. } => "mock-public-password".to_string(),
            Scope::Private => "mock-private-password".to_string(),
        })
    }
}

// ============ MockScanner ============

/// In-memory scanner
#[derive(Default)]
pub struct MockScanner {
    vulnerable: RwLock<HashSet<String>>,
    scanned: RwLock<Vec<String>>,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_vulnerable(&self, image: &str) {
        self.vulnerable.write().unwrap().insert(image.to_string());
    }

    pub fn scanned(&self) -> Vec<String> {
        self.scanned.read().unwrap().clone()
    }
}

#[async_trait]
impl Scanner for MockScanner {
    async fn scan(&self, image: &ImageReference, severity: &str) -> Result<ScanVerdict> {
        let name = image.to_string();
        self.scanned.write().unwrap().push(name.clone());
        if self.vulnerable.read().unwrap().contains(&name) {
            Ok(ScanVerdict::Fail {
                detail: format!("{} findings reported", severity),
                output: format!("{}\nCVE-2024-0001  {}  openssl", name, severity),
            })
        } else {
            Ok(ScanVerdict::Pass)
        }
    }
}

// ============ MockTools ============

/// All mocks together, with a [`Toolbox`] view for code under test
#[derive(Clone)]
pub struct MockTools {
    pub package_manager: Arc<MockPackageManager>,
    pub engine: Arc<MockContainerEngine>,
    pub registry: Arc<MockRegistry>,
    pub scanner: Arc<MockScanner>,
}

impl MockTools {
    /// Mocks whose registry API reports `private_registry` as the private URL
    pub fn new(private_registry: &str) -> Self {
        Self {
            package_manager: Arc::new(MockPackageManager::new()),
            engine: Arc::new(MockContainerEngine::new()),
            registry: Arc::new(MockRegistry::new(private_registry)),
            scanner: Arc::new(MockScanner::new()),
        }
    }

    pub fn toolbox(&self) -> Toolbox {
        Toolbox {
            package_manager: self.package_manager.clone(),
            engine: self.engine.clone(),
            registry: self.registry.clone(),
            scanner: self.scanner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_runner_longest_prefix_and_sequence() {
        let runner = ScriptedRunner::new();
        runner.respond("docker", CommandOutput::failure(1, "generic"));
        runner.respond_sequence(
            "docker pull",
            vec![CommandOutput::failure(1, "first"), CommandOutput::success("ok")],
        );

        let pull = Invocation::new("docker").args(["pull", "nginx"]);
        assert_eq!(runner.run(&pull).await.unwrap().stderr, "first");
        assert!(runner.run(&pull).await.unwrap().is_success());
        assert!(runner.run(&pull).await.unwrap().is_success());

        let push = Invocation::new("docker").args(["push", "nginx"]);
        assert_eq!(runner.run(&push).await.unwrap().stderr, "generic");

        let other = Invocation::new("helm").arg("version");
        assert!(runner.run(&other).await.unwrap().is_success());
        assert_eq!(runner.invocations().len(), 5);
    }

    #[tokio::test]
    async fn test_mock_chart_version_selection() {
        let helm = MockPackageManager::new();
        helm.add_chart(MockChart::new("web", &["1.0.0", "1.0.3", "1.1.0"]));
        let source = ChartSource::Repository {
            url: "https://charts.example.com".to_string(),
            chart: "web".to_string(),
        };

        assert_eq!(helm.show_chart(&source, None).await.unwrap().version, "1.1.0");
        assert_eq!(helm.show_chart(&source, Some("1.0.0")).await.unwrap().version, "1.0.0");
        assert_eq!(helm.show_chart(&source, Some("~1.0")).await.unwrap().version, "1.0.3");
        assert!(helm.show_chart(&source, Some("2.0.0")).await.is_err());
        assert_eq!(helm.operation_counts().shows, 4);
    }

    #[tokio::test]
    async fn test_mock_pull_writes_archive() {
        let dir = tempfile::TempDir::new().unwrap();
        let helm = MockPackageManager::new();
        helm.add_chart(MockChart::new("web", &["1.0.0"]).with_values("replicaCount: 1\n"));
        let source = ChartSource::Repository {
            url: "https://charts.example.com".to_string(),
            chart: "web".to_string(),
        };

        helm.pull(&source, "1.0.0", dir.path()).await.unwrap();
        let archive = dir.path().join("web-1.0.0.tgz");
        stowaway_core::archive::extract_archive(&archive, &dir.path().join("out")).unwrap();
        let values = std::fs::read_to_string(dir.path().join("out/web/values.yaml")).unwrap();
        assert_eq!(values, "replicaCount: 1\n");
    }

    #[tokio::test]
    async fn test_mock_engine_scheduled_failures() {
        let engine = MockContainerEngine::new();
        let image = ImageReference::parse("docker.io/app:1").unwrap();
        engine.fail_pull("docker.io/app:1", 2);

        assert!(engine.pull(&image).await.is_err());
        assert!(engine.pull(&image).await.is_err());
        assert!(engine.pull(&image).await.is_ok());
        assert_eq!(engine.operation_counts().pulls, 3);
        assert_eq!(engine.pulled(), vec!["docker.io/app:1".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_registry_repositories() {
        let registry = MockRegistry::new("123.dkr.ecr.eu-west-1.amazonaws.com");
        assert_eq!(registry.describe_repository("web").await, Lookup::NotFound);
        assert_eq!(registry.create_repository("web").await.unwrap(), CreateOutcome::Created);
        assert_eq!(registry.create_repository("web").await.unwrap(), CreateOutcome::AlreadyExists);
        assert_eq!(registry.describe_repository("web").await, Lookup::Exists);

        registry.add_image("web", "1.0.0");
        assert_eq!(registry.describe_image("web", "1.0.0").await, Lookup::Exists);
        assert_eq!(registry.describe_image("web", "1.0.1").await, Lookup::NotFound);
    }
}
