//! Image discovery from rendered chart templates
//!
//! Every string under an `image` key, in any document of the rendered
//! stream, is a candidate. Candidates are de-duplicated after dropping digest
//! pins, then checked for reachability before anything is pulled.

use indexmap::{IndexMap, IndexSet};
use std::path::Path;
use stowaway_core::document::{collect_strings_under_key, parse_stream};
use stowaway_core::{ChartJob, FailedCommand, FailureKind, ImageReference};
use stowaway_tools::{Lookup, RegistrySession, ToolError};

use crate::error::failed_command;

const IMAGE_KEY: &str = "image";

/// Image references found in a rendered template stream, digest-free and unique
pub fn images_in_stream(rendered: &str) -> stowaway_core::Result<Vec<ImageReference>> {
    let mut images = IndexSet::new();
    for document in parse_stream(rendered)? {
        for raw in collect_strings_under_key(&document, IMAGE_KEY) {
            match ImageReference::parse(&raw) {
                Ok(image) => {
                    images.insert(image.without_digest());
                }
                Err(e) => tracing::warn!(image = %raw, error = %e, "ignoring unparsable image reference"),
            }
        }
    }
    Ok(images.into_iter().collect())
}

pub struct ImageDiscoverer<'a> {
    session: &'a RegistrySession,
    set: &'a IndexMap<String, String>,
}

impl<'a> ImageDiscoverer<'a> {
    /// `set` holds the substitutions passed to the renderer
    pub fn new(session: &'a RegistrySession, set: &'a IndexMap<String, String>) -> Self {
        Self { session, set }
    }

    /// Render `chart` and list the images its templates reference
    pub async fn render_images(&self, chart: &Path) -> Result<Vec<ImageReference>, ToolError> {
        let rendered = self.session.tools().package_manager.template(chart, self.set).await?;
        Ok(images_in_stream(&rendered)?)
    }

    /// Check that `image` can be pulled, logging in first where needed
    ///
    /// `Lookup::Failed` carries the reason when the check itself broke.
    pub async fn verify(&self, image: &ImageReference) -> Lookup {
        if let Err(e) = self.session.ensure_engine_for(image).await {
            return Lookup::Failed(e.to_string());
        }
        self.session.tools().engine.inspect_manifest(image).await
    }

    /// Fill `job` with the chart's reachable images
    ///
    /// Unreachable images become failed pulls. A render failure is logged in
    /// the job and leaves it without images.
    pub async fn discover(&self, job: &mut ChartJob, chart: &Path) {
        let images = match self.render_images(chart).await {
            Ok(images) => images,
            Err(e) => {
                tracing::error!(chart = %job.chart_name(), error = %e, "failed to render templates");
                if e.is_reportable() {
                    job.record_command(failed_command(FailureKind::Render, &e, "helm template"));
                }
                return;
            }
        };

        let candidates: Vec<ImageReference> = images
            .into_iter()
            .filter(|image| job.record_discovered(image))
            .collect();
        tracing::info!(chart = %job.chart_name(), count = candidates.len(), "discovered images");

        for image in candidates {
            match self.verify(&image).await {
                Lookup::Exists => tracing::debug!(image = %image, "image reachable"),
                Lookup::NotFound => {
                    tracing::warn!(image = %image, "image manifest not found");
                    job.record_unreachable(&image);
                    job.record_command(FailedCommand {
                        kind: FailureKind::ImageUnreachable,
                        command: format!("docker manifest inspect {}", image),
                        message: format!("Image {} does not exist", image),
                        stderr: String::new(),
                    });
                }
                Lookup::Failed(detail) => {
                    tracing::warn!(image = %image, detail = %detail, "image manifest could not be inspected");
                    job.record_unreachable(&image);
                    job.record_command(FailedCommand {
                        kind: FailureKind::ImageUnreachable,
                        command: format!("docker manifest inspect {}", image),
                        message: format!("Unable to inspect image {}", image),
                        stderr: detail,
                    });
                }
            }
        }
    }
}
