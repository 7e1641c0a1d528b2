//! Run report
//!
//! One [`ChartReport`] per processed manifest, whether the chart was mirrored
//! or skipped. The whole report serializes to JSON for `--report`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use stowaway_core::{ChartJob, ChartPushStatus, ChartReference};

use crate::error::Result;

/// Why a chart was not mirrored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    /// The pinned version is not what the repository serves
    NotAvailable { requested: String, available: String },
    /// The version query itself failed
    ResolutionFailed { message: String, stderr: String },
    /// The private registry address could not be determined
    RegistryUnavailable { message: String },
    /// Download or unpack failed
    FetchFailed { message: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotAvailable { requested, available } => {
                write!(f, "version {} not available (repository serves {})", requested, available)
            }
            SkipReason::ResolutionFailed { message, .. } => write!(f, "resolution failed: {}", message),
            SkipReason::RegistryUnavailable { message } => write!(f, "private registry unavailable: {}", message),
            SkipReason::FetchFailed { message } => write!(f, "download failed: {}", message),
        }
    }
}

/// Outcome of one chart reference manifest
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartReport {
    /// Manifest path relative to the manifests directory
    pub manifest: PathBuf,
    pub chart: ChartReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_version: Option<String>,
    /// Pinned version replaced when following latest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_sha256: Option<String>,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<ChartJob>,
    /// Files written for the mirrored chart
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PathBuf>,
    /// Values paths that matched an image but could not be overlaid
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overlay_skipped: Vec<String>,
    /// Problems writing outputs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_errors: Vec<String>,
}

impl ChartReport {
    pub fn new(manifest: PathBuf, chart: ChartReference) -> Self {
        Self {
            manifest,
            chart,
            resolved_version: None,
            previous_version: None,
            archive: None,
            archive_sha256: None,
            cache_hit: false,
            skipped: None,
            job: None,
            outputs: Vec::new(),
            overlay_skipped: Vec::new(),
            output_errors: Vec::new(),
        }
    }

    pub fn skip(mut self, reason: SkipReason) -> Self {
        self.skipped = Some(reason);
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Skipped, or mirrored with failures or findings
    pub fn has_problems(&self) -> bool {
        self.is_skipped()
            || !self.output_errors.is_empty()
            || self.job.as_ref().is_some_and(ChartJob::has_problems)
    }
}

/// Aggregated counts over a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTotals {
    pub charts: usize,
    pub skipped: usize,
    pub discovered_images: usize,
    pub pushed_images: usize,
    pub failed_pulls: usize,
    pub failed_pushes: usize,
    pub vulnerabilities: usize,
    pub charts_pushed: usize,
}

/// Everything that happened in one run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub selector: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub charts: Vec<ChartReport>,
}

impl RunReport {
    pub fn start(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            started_at: Utc::now(),
            finished_at: None,
            charts: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn totals(&self) -> RunTotals {
        let mut totals = RunTotals {
            charts: self.charts.len(),
            ..RunTotals::default()
        };
        for chart in &self.charts {
            if chart.is_skipped() {
                totals.skipped += 1;
            }
            if let Some(job) = &chart.job {
                totals.discovered_images += job.discovered_images().len();
                totals.pushed_images += job.pushed_images().len();
                totals.failed_pulls += job.failed_pulls().len();
                totals.failed_pushes += job.failed_pushes().len();
                totals.vulnerabilities += job.vulnerabilities().len();
                if *job.chart_push() == ChartPushStatus::Pushed {
                    totals.charts_pushed += 1;
                }
            }
        }
        totals
    }

    pub fn has_problems(&self) -> bool {
        self.charts.iter().any(ChartReport::has_problems)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
