//! Images command - list the images a local chart references

use console::style;
use std::path::Path;
use stowaway_core::parse_set_args;
use stowaway_mirror::{ImageDiscoverer, MirrorSettings};
use stowaway_tools::{Lookup, RegistrySession, Toolbox};

use crate::error::{CliError, Result};

pub async fn run(settings: &MirrorSettings, chart: &Path, set: &[String], verify: bool) -> Result<()> {
    if !chart.exists() {
        return Err(CliError::document_with_help(
            format!("Chart not found: {}", chart.display()),
            "Pass a chart directory or a .tgz archive",
        ));
    }

    let overrides = parse_set_args(set).map_err(|e| CliError::usage(e.to_string()))?;
    let mut substitutions = settings.render.set.clone();
    substitutions.extend(overrides);

    let tools = Toolbox::cli(&settings.tools, settings.registries.region.clone());
    let session = RegistrySession::new(tools, settings.registries.auth());
    let discoverer = ImageDiscoverer::new(&session, &substitutions);

    let images = discoverer.render_images(chart).await?;
    if images.is_empty() {
        println!("{} No images referenced by {}", style("⚠").yellow(), chart.display());
        return Ok(());
    }

    let mut unreachable = 0;
    for image in &images {
        if !verify {
            println!("{}", image);
            continue;
        }
        match discoverer.verify(image).await {
            Lookup::Exists => println!("  {} {}", style("✓").green(), image),
            Lookup::NotFound => {
                unreachable += 1;
                println!("  {} {} {}", style("✗").red(), image, style("(not found)").dim());
            }
            Lookup::Failed(detail) => {
                unreachable += 1;
                println!("  {} {} {}", style("⚠").yellow(), image, style(detail.trim()).dim());
            }
        }
    }

    if verify {
        println!();
        if unreachable == 0 {
            println!("{} {} image(s), all reachable", style("✓").green().bold(), images.len());
        } else {
            println!(
                "{} {} image(s), {} unreachable",
                style("⚠").yellow().bold(),
                images.len(),
                unreachable
            );
        }
    }
    Ok(())
}
