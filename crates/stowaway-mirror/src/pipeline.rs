//! The mirroring pipeline
//!
//! Charts are processed one after another. For each chart reference:
//!
//! 1. resolve the version to mirror
//! 2. fetch (or reuse) the chart archive
//! 3. discover the images its templates reference
//! 4. pull, then scan them
//! 5. push the chart and the images (unless only scanning)
//! 6. write the rewritten manifest and values overlay (unless only scanning)
//!
//! Resolution and download problems skip the chart; everything after that is
//! recorded in the chart's job and never stops the run.

use serde::Serialize;
use std::sync::Arc;
use stowaway_core::archive::sha256_file;
use stowaway_core::values::{load_values, rewrite};
use stowaway_core::{AppManifest, ChartJob, load_manifests};
use stowaway_tools::{RegistrySession, Toolbox};

use crate::chart_push::ChartMirror;
use crate::config::MirrorSettings;
use crate::discover::ImageDiscoverer;
use crate::error::Result;
use crate::fetcher::{ChartFetcher, FetchedChart};
use crate::images::ImageMirror;
use crate::progress::{NoopObserver, ProgressObserver, Stage};
use crate::report::{ChartReport, RunReport, SkipReason};
use crate::resolver::{ChartResolver, Resolution};

/// Command-line switches of a mirror run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Mirror the newest version instead of the pinned one
    pub latest: bool,
    /// Scan without writing outputs (and without pushing, unless `push_images`)
    pub scan_only: bool,
    pub push_images: bool,
    /// Skip scanning even when enabled in the settings
    pub skip_scan: bool,
}

impl RunOptions {
    /// Images and chart are pushed unless only scanning was asked for
    pub fn should_push(&self) -> bool {
        self.push_images || !self.scan_only
    }

    pub fn writes_outputs(&self) -> bool {
        !self.scan_only
    }
}

pub struct Pipeline {
    tools: Toolbox,
    settings: MirrorSettings,
    options: RunOptions,
    observer: Arc<dyn ProgressObserver>,
}

impl Pipeline {
    pub fn new(tools: Toolbox, settings: MirrorSettings, options: RunOptions) -> Self {
        Self {
            tools,
            settings,
            options,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &MirrorSettings {
        &self.settings
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Mirror every chart referenced by manifests whose path contains `selector`
    ///
    /// Only a missing manifests directory is an error; per-chart problems end
    /// up in the report.
    pub async fn run(&self, selector: &str) -> Result<RunReport> {
        let manifests = load_manifests(&self.settings.paths.manifests, selector)?;
        tracing::info!(
            selector,
            count = manifests.len(),
            dir = %self.settings.paths.manifests.display(),
            "found chart manifests"
        );
        Ok(self.run_manifests(selector, &manifests).await)
    }

    pub async fn run_manifests(&self, selector: &str, manifests: &[AppManifest]) -> RunReport {
        let mut report = RunReport::start(selector);
        for manifest in manifests {
            let chart = self.mirror_chart(manifest).await;
            self.observer.chart_finished(&chart.chart.name, chart.has_problems());
            report.charts.push(chart);
        }
        report.finish();
        report
    }

    async fn mirror_chart(&self, manifest: &AppManifest) -> ChartReport {
        let reference = &manifest.chart;
        let mut report = ChartReport::new(manifest.relative.clone(), reference.clone());
        self.observer.chart_started(reference);
        tracing::info!(chart = %reference.name, version = %reference.version, manifest = %manifest.relative.display(), "mirroring chart");

        let session = RegistrySession::new(self.tools.clone(), self.settings.registries.auth());
        let oci_hosts = &self.settings.registries.oci_hosts;

        // Resolve
        self.observer.stage_started(&reference.name, Stage::Resolve, 1);
        let resolution = ChartResolver::new(&session, oci_hosts)
            .resolve(reference, self.options.latest)
            .await;
        self.observer.stage_finished(&reference.name, Stage::Resolve);
        let version = match resolution {
            Ok(Resolution::Resolved { version, previous }) => {
                report.previous_version = previous;
                version
            }
            Ok(Resolution::NotAvailable { requested, available }) => {
                return report.skip(SkipReason::NotAvailable { requested, available });
            }
            Err(e) => {
                tracing::error!(chart = %reference.name, error = %e, "version resolution failed");
                let stderr = e.stderr().to_string();
                return report.skip(SkipReason::ResolutionFailed {
                    message: e.to_string(),
                    stderr,
                });
            }
        };
        report.resolved_version = Some(version.clone());

        let private_registry = match session.private_registry().await {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::error!(chart = %reference.name, error = %e, "cannot determine private registry");
                return report.skip(SkipReason::RegistryUnavailable { message: e.to_string() });
            }
        };
        let mut job = ChartJob::new(reference.clone(), version, private_registry);

        // Fetch
        self.observer.stage_started(&reference.name, Stage::Fetch, 1);
        let fetched = ChartFetcher::new(&session, oci_hosts)
            .fetch(reference, job.version(), &self.settings.paths.charts)
            .await;
        self.observer.stage_finished(&reference.name, Stage::Fetch);
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!(chart = %reference.name, error = %e, "chart download failed");
                report.job = Some(job);
                return report.skip(SkipReason::FetchFailed { message: e.to_string() });
            }
        };
        report.archive = Some(fetched.archive.clone());
        report.cache_hit = fetched.cache_hit;
        match sha256_file(&fetched.archive) {
            Ok(digest) => report.archive_sha256 = Some(digest),
            Err(e) => tracing::warn!(path = %fetched.archive.display(), error = %e, "cannot fingerprint archive"),
        }

        // Discover
        self.observer.stage_started(&reference.name, Stage::Discover, 1);
        ImageDiscoverer::new(&session, &self.settings.render.set)
            .discover(&mut job, &fetched.archive)
            .await;
        self.observer.stage_finished(&reference.name, Stage::Discover);

        // Pull and scan
        let images = ImageMirror::new(&session, self.observer.as_ref(), self.settings.workers);
        images.pull(&mut job, &self.settings.image_pull).await;
        if self.settings.scan.enabled && !self.options.skip_scan {
            images.scan(&mut job, &self.settings.scan.severity).await;
        }

        // Push
        if self.options.should_push() {
            ChartMirror::new(&session, self.observer.as_ref())
                .push(&mut job, &fetched.archive, &self.settings.chart_push)
                .await;
            images.push(&mut job, &self.settings.image_push).await;
        } else {
            tracing::info!(chart = %reference.name, "scan only, nothing pushed");
        }

        // Outputs
        if self.options.writes_outputs() {
            self.observer.stage_started(&reference.name, Stage::Values, 1);
            self.write_outputs(manifest, &job, &fetched, &mut report);
            self.observer.stage_finished(&reference.name, Stage::Values);
        }

        report.job = Some(job);
        report
    }

    fn write_outputs(&self, manifest: &AppManifest, job: &ChartJob, fetched: &FetchedChart, report: &mut ChartReport) {
        match manifest.write_mirrored(&self.settings.paths.output, job.version(), job.private_registry()) {
            Ok(path) => report.outputs.push(path),
            Err(e) => {
                tracing::error!(manifest = %manifest.path.display(), error = %e, "cannot write mirrored manifest");
                report.output_errors.push(e.to_string());
            }
        }

        let values_file = fetched.values_file();
        let values = if values_file.is_file() {
            load_values(&values_file)
        } else {
            tracing::warn!(path = %values_file.display(), "chart has no values file");
            Ok(serde_yaml::Value::Mapping(Default::default()))
        };

        let overlay = match values {
            Ok(values) => rewrite(&values, job.mirrored_images()),
            Err(e) => {
                tracing::error!(path = %values_file.display(), error = %e, "cannot read chart values");
                report.output_errors.push(e.to_string());
                return;
            }
        };
        report.overlay_skipped = overlay.skipped().to_vec();

        let target = fetched.overlay_file();
        match overlay.write_to(&target) {
            Ok(()) => {
                tracing::info!(path = %target.display(), rewrites = overlay.rewrites().len(), "wrote values overlay");
                report.outputs.push(target);
            }
            Err(e) => {
                tracing::error!(path = %target.display(), error = %e, "cannot write values overlay");
                report.output_errors.push(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_decision() {
        let default = RunOptions::default();
        assert!(default.should_push());
        assert!(default.writes_outputs());

        let scan_only = RunOptions {
            scan_only: true,
            ..RunOptions::default()
        };
        assert!(!scan_only.should_push());
        assert!(!scan_only.writes_outputs());

        let scan_and_push = RunOptions {
            scan_only: true,
            push_images: true,
            ..RunOptions::default()
        };
        assert!(scan_and_push.should_push());
        assert!(!scan_and_push.writes_outputs());
    }
}
