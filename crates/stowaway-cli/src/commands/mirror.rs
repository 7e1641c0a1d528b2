//! Mirror command - airgap every chart matching a selector

use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowaway_mirror::{MirrorSettings, Pipeline, RunOptions};
use stowaway_tools::Toolbox;

use crate::display;
use crate::error::{CliError, Result};
use crate::progress::ProgressDisplay;

/// Command-line values that replace their settings-file counterparts
#[derive(Debug, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub manifests: Option<PathBuf>,
    pub charts: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(self, settings: &mut MirrorSettings) {
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(dir) = self.manifests {
            settings.paths.manifests = dir;
        }
        if let Some(dir) = self.charts {
            settings.paths.charts = dir;
        }
        if let Some(dir) = self.output {
            settings.paths.output = dir;
        }
    }
}

pub async fn run(
    mut settings: MirrorSettings,
    overrides: Overrides,
    selector: &str,
    options: RunOptions,
    report_path: Option<&Path>,
) -> Result<()> {
    overrides.apply(&mut settings);
    settings.validate()?;

    println!(
        "{} Mirroring charts matching '{}' from {}",
        style("→").blue(),
        selector,
        settings.paths.manifests.display()
    );
    if options.scan_only {
        let pushing = if options.should_push() { "images will be pushed" } else { "nothing will be pushed" };
        println!("  {} scan only: no outputs written, {}", style("⚠").yellow(), pushing);
    }

    let tools = Toolbox::cli(&settings.tools, settings.registries.region.clone());
    let pipeline = Pipeline::new(tools, settings, options).with_observer(Arc::new(ProgressDisplay::new()));
    let report = pipeline.run(selector).await?;

    display::print_run(&report);

    if let Some(path) = report_path {
        report.write_json(path).map_err(|e| CliError::io_at(path, e))?;
        println!("{} Report written to {}", style("✓").green(), path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_settings() {
        let mut settings = MirrorSettings::default();
        Overrides {
            workers: Some(4),
            manifests: Some(PathBuf::from("/srv/appsets")),
            ..Overrides::default()
        }
        .apply(&mut settings);

        assert_eq!(settings.workers, 4);
        assert_eq!(settings.paths.manifests, PathBuf::from("/srv/appsets"));
        assert_eq!(settings.paths.charts, MirrorSettings::default().paths.charts);
    }
}
