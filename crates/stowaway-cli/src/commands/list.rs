//! List command - show chart references found in manifests

use console::style;
use stowaway_core::load_manifests;
use stowaway_mirror::MirrorSettings;

use crate::error::Result;

pub fn run(settings: &MirrorSettings, selector: &str) -> Result<()> {
    let manifests = load_manifests(&settings.paths.manifests, selector)?;

    if manifests.is_empty() {
        println!(
            "{} No chart manifests matching '{}' in {}",
            style("⚠").yellow(),
            selector,
            settings.paths.manifests.display()
        );
        return Ok(());
    }

    println!(
        "{:<24} {:<12} {:<48} {:<16} {:<20} {}",
        style("CHART").bold(),
        style("VERSION").bold(),
        style("REPOSITORY").bold(),
        style("NAMESPACE").bold(),
        style("RELEASE").bold(),
        style("MANIFEST").bold()
    );

    for manifest in &manifests {
        let chart = &manifest.chart;
        println!(
            "{:<24} {:<12} {:<48} {:<16} {:<20} {}",
            chart.name,
            chart.version,
            chart.repository,
            or_dash(&chart.namespace),
            or_dash(&chart.release_name),
            style(manifest.relative.display()).dim()
        );
    }

    println!();
    println!("{} chart reference(s)", manifests.len());
    Ok(())
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}
