//! Per-chart mirror job state
//!
//! A [`ChartJob`] is created once a chart version has been resolved and the
//! private registry is known. Every stage records its outcome through the
//! methods here, which keep the bookkeeping consistent:
//!
//! - an image is never both mirrored and a failed pull
//! - push outcomes can only be recorded for mirrored images
//! - an image is never both pushed and a failed push

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fmt;

use crate::chart::ChartReference;
use crate::reference::ImageReference;

/// Category of a recorded failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Authentication,
    Render,
    ImageUnreachable,
    PullExhausted,
    PushExhausted,
    RegistryProvisioning,
    ChartPush,
    Command,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Authentication => "authentication",
            FailureKind::Render => "render",
            FailureKind::ImageUnreachable => "image unreachable",
            FailureKind::PullExhausted => "pull exhausted",
            FailureKind::PushExhausted => "push exhausted",
            FailureKind::RegistryProvisioning => "registry provisioning",
            FailureKind::ChartPush => "chart push",
            FailureKind::Command => "command",
        };
        f.write_str(s)
    }
}

/// An external command that failed, kept for the postmortem report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCommand {
    pub kind: FailureKind,
    /// Command line, with secrets omitted
    pub command: String,
    /// Human readable description
    pub message: String,
    /// Raw diagnostic output of the tool
    pub stderr: String,
}

/// A critical-severity scan failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vulnerability {
    pub image: ImageReference,
    pub detail: String,
    pub output: String,
}

/// Outcome of mirroring the chart archive itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ChartPushStatus {
    #[default]
    NotAttempted,
    AlreadyPresent,
    Pushed,
    Failed { reason: String },
}

/// Mutable state of one chart being mirrored
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartJob {
    reference: ChartReference,
    version: String,
    private_registry: String,
    discovered_images: IndexSet<ImageReference>,
    mirrored_images: IndexMap<ImageReference, ImageReference>,
    pushed_images: IndexSet<ImageReference>,
    vulnerabilities: Vec<Vulnerability>,
    failed_pulls: IndexSet<ImageReference>,
    failed_pushes: IndexSet<ImageReference>,
    chart_push: ChartPushStatus,
    failed_commands: Vec<FailedCommand>,
}

impl ChartJob {
    /// Create a job for a resolved chart version
    pub fn new(
        reference: ChartReference,
        version: impl Into<String>,
        private_registry: impl Into<String>,
    ) -> Self {
        Self {
            reference,
            version: version.into(),
            private_registry: private_registry.into().trim_end_matches('/').to_string(),
            discovered_images: IndexSet::new(),
            mirrored_images: IndexMap::new(),
            pushed_images: IndexSet::new(),
            vulnerabilities: Vec::new(),
            failed_pulls: IndexSet::new(),
            failed_pushes: IndexSet::new(),
            chart_push: ChartPushStatus::NotAttempted,
            failed_commands: Vec::new(),
        }
    }

    pub fn reference(&self) -> &ChartReference {
        &self.reference
    }

    pub fn chart_name(&self) -> &str {
        &self.reference.name
    }

    /// Resolved version (may differ from the manifest's when following latest)
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn private_registry(&self) -> &str {
        &self.private_registry
    }

    pub fn discovered_images(&self) -> &IndexSet<ImageReference> {
        &self.discovered_images
    }

    /// Public to private mapping of every successfully pulled image
    pub fn mirrored_images(&self) -> &IndexMap<ImageReference, ImageReference> {
        &self.mirrored_images
    }

    pub fn pushed_images(&self) -> &IndexSet<ImageReference> {
        &self.pushed_images
    }

    pub fn vulnerabilities(&self) -> &[Vulnerability] {
        &self.vulnerabilities
    }

    pub fn failed_pulls(&self) -> &IndexSet<ImageReference> {
        &self.failed_pulls
    }

    pub fn failed_pushes(&self) -> &IndexSet<ImageReference> {
        &self.failed_pushes
    }

    pub fn chart_push(&self) -> &ChartPushStatus {
        &self.chart_push
    }

    pub fn failed_commands(&self) -> &[FailedCommand] {
        &self.failed_commands
    }

    /// Record an image found in the rendered templates
    ///
    /// Digest pins are dropped so `app:1.0@sha256:a` and `app:1.0@sha256:b`
    /// collapse into one entry. Returns false for duplicates.
    pub fn record_discovered(&mut self, image: &ImageReference) -> bool {
        self.discovered_images.insert(image.without_digest())
    }

    /// Images still waiting for a pull attempt
    pub fn pull_candidates(&self) -> Vec<ImageReference> {
        self.discovered_images
            .iter()
            .filter(|i| !self.failed_pulls.contains(*i) && !self.mirrored_images.contains_key(*i))
            .cloned()
            .collect()
    }

    /// Record a discovery-time reachability failure
    ///
    /// Unreachable images are classified as failed pulls and never attempted.
    pub fn record_unreachable(&mut self, image: &ImageReference) {
        self.record_pull_failure(image);
    }

    /// Record a successful pull and return the private reference it maps to
    pub fn record_pull_success(&mut self, image: &ImageReference) -> ImageReference {
        let private = image.mirrored_into(&self.private_registry, &self.reference.name);
        self.failed_pulls.shift_remove(image);
        self.mirrored_images.insert(image.clone(), private.clone());
        private
    }

    pub fn record_pull_failure(&mut self, image: &ImageReference) {
        self.mirrored_images.shift_remove(image);
        self.failed_pulls.insert(image.clone());
    }

    /// (public, private) pairs eligible for push
    pub fn push_candidates(&self) -> Vec<(ImageReference, ImageReference)> {
        self.mirrored_images
            .iter()
            .map(|(public, private)| (public.clone(), private.clone()))
            .collect()
    }

    /// Record a successful push. Ignored (returns false) for images that
    /// were never pulled.
    pub fn record_push_success(&mut self, image: &ImageReference) -> bool {
        if !self.mirrored_images.contains_key(image) {
            return false;
        }
        self.failed_pushes.shift_remove(image);
        self.pushed_images.insert(image.clone());
        true
    }

    /// Record an exhausted or refused push. Ignored (returns false) for
    /// images that were never pulled.
    pub fn record_push_failure(&mut self, image: &ImageReference) -> bool {
        if !self.mirrored_images.contains_key(image) {
            return false;
        }
        self.pushed_images.shift_remove(image);
        self.failed_pushes.insert(image.clone());
        true
    }

    pub fn record_vulnerability(&mut self, vulnerability: Vulnerability) {
        self.vulnerabilities.push(vulnerability);
    }

    pub fn record_command(&mut self, failure: FailedCommand) {
        self.failed_commands.push(failure);
    }

    pub fn set_chart_push(&mut self, status: ChartPushStatus) {
        self.chart_push = status;
    }

    /// Whether anything in this job failed or was flagged
    pub fn has_problems(&self) -> bool {
        !self.failed_pulls.is_empty()
            || !self.failed_pushes.is_empty()
            || !self.vulnerabilities.is_empty()
            || matches!(self.chart_push, ChartPushStatus::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ChartJob {
        let reference = ChartReference {
            name: "web".to_string(),
            version: "1.0.0".to_string(),
            repository: "https://charts.example.com".to_string(),
            namespace: String::new(),
            release_name: String::new(),
        };
        ChartJob::new(reference, "1.0.0", "registry.example/")
    }

    fn image(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    #[test]
    fn test_private_registry_normalized() {
        assert_eq!(job().private_registry(), "registry.example");
    }

    #[test]
    fn test_discovery_deduplicates_digest_pins() {
        let mut job = job();
        assert!(job.record_discovered(&image("docker.io/app:1.0@sha256:aaa")));
        assert!(!job.record_discovered(&image("docker.io/app:1.0@sha256:bbb")));
        assert!(!job.record_discovered(&image("docker.io/app:1.0")));
        assert_eq!(job.discovered_images().len(), 1);
        assert_eq!(
            job.discovered_images()[0].to_string(),
            "docker.io/app:1.0"
        );
    }

    #[test]
    fn test_pull_outcomes_are_exclusive() {
        let mut job = job();
        let app = image("docker.io/app:1.0");
        job.record_discovered(&app);

        job.record_pull_failure(&app);
        assert!(job.failed_pulls().contains(&app));
        assert!(job.pull_candidates().is_empty());

        let private = job.record_pull_success(&app);
        assert_eq!(private.to_string(), "registry.example/web/app:1.0");
        assert!(!job.failed_pulls().contains(&app));
        assert_eq!(job.mirrored_images().get(&app), Some(&private));

        job.record_pull_failure(&app);
        assert!(job.mirrored_images().is_empty());
    }

    #[test]
    fn test_unreachable_images_are_not_pull_candidates() {
        let mut job = job();
        let ok = image("docker.io/ok:1");
        let gone = image("docker.io/gone:1");
        job.record_discovered(&ok);
        job.record_discovered(&gone);
        job.record_unreachable(&gone);

        assert_eq!(job.pull_candidates(), vec![ok]);
        assert!(job.failed_pulls().contains(&gone));
    }

    #[test]
    fn test_push_requires_pull() {
        let mut job = job();
        let app = image("docker.io/app:1.0");
        assert!(!job.record_push_success(&app));
        assert!(!job.record_push_failure(&app));
        assert!(job.pushed_images().is_empty());
        assert!(job.failed_pushes().is_empty());

        job.record_discovered(&app);
        job.record_pull_success(&app);
        assert!(job.record_push_failure(&app));
        assert!(job.record_push_success(&app));
        assert!(job.pushed_images().contains(&app));
        assert!(!job.failed_pushes().contains(&app));
    }

    #[test]
    fn test_has_problems() {
        let mut job = job();
        assert!(!job.has_problems());
        job.set_chart_push(ChartPushStatus::Failed {
            reason: "timeout".to_string(),
        });
        assert!(job.has_problems());
    }
}
