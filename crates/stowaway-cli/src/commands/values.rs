//! Values command - rewrite a values file for mirrored images

use console::style;
use indexmap::IndexMap;
use std::path::Path;
use stowaway_core::ImageReference;
use stowaway_core::values::{load_values, rewrite};

use crate::error::{CliError, Result};

/// Parse `PUBLIC=PRIVATE` image pairs
pub fn parse_mappings(args: &[String]) -> Result<IndexMap<ImageReference, ImageReference>> {
    let mut mapping = IndexMap::new();
    for arg in args {
        let (public, private) = arg.split_once('=').ok_or_else(|| {
            CliError::usage_with_help(
                format!("Invalid --map format: '{}'", arg),
                "Expected PUBLIC=PRIVATE, e.g. docker.io/nginx:1.25=123456789012.dkr.ecr.eu-west-1.amazonaws.com/web/nginx:1.25",
            )
        })?;
        let parse = |s: &str| ImageReference::parse(s).map_err(|e| CliError::usage(e.to_string()));
        mapping.insert(parse(public)?, parse(private)?);
    }
    Ok(mapping)
}

pub fn run(values_file: &Path, maps: &[String], output: Option<&Path>) -> Result<()> {
    let mapping = parse_mappings(maps)?;
    if !values_file.is_file() {
        return Err(CliError::document_with_help(
            format!("Values file not found: {}", values_file.display()),
            "Pass the chart's values.yaml",
        ));
    }

    let values = load_values(values_file)?;
    let overlay = rewrite(&values, &mapping);

    for path in overlay.skipped() {
        eprintln!(
            "{} {} matches a mapped image but cannot be overlaid",
            style("⚠").yellow(),
            style(path).dim()
        );
    }

    match output {
        Some(path) => {
            overlay.write_to(path)?;
            println!(
                "{} Wrote {} rewrite(s) to {}",
                style("✓").green(),
                overlay.rewrites().len(),
                path.display()
            );
        }
        None => print!("{}", overlay.to_yaml()?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mappings() {
        let mapping = parse_mappings(&["public.example/foo:1.0=private.example/chart/foo:1.0".to_string()]).unwrap();
        let (public, private) = mapping.first().unwrap();
        assert_eq!(public.repository, "foo");
        assert_eq!(private.registry.as_deref(), Some("private.example"));
    }

    #[test]
    fn test_parse_mappings_rejects_missing_separator() {
        let err = parse_mappings(&["public.example/foo:1.0".to_string()]).unwrap_err();
        assert!(matches!(err, CliError::Usage { .. }));
    }
}
