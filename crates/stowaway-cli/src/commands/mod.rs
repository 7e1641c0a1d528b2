//! CLI commands

pub mod images;
pub mod list;
pub mod mirror;
pub mod values;

use std::path::Path;
use stowaway_mirror::MirrorSettings;

use crate::error::Result;

/// Settings from `--config` or the default locations
pub fn load_settings(config: Option<&Path>) -> Result<MirrorSettings> {
    let (settings, source) = MirrorSettings::load(config)?;
    match source {
        Some(path) => tracing::debug!(path = %path.display(), "using settings file"),
        None => tracing::debug!("no settings file, using defaults"),
    }
    Ok(settings)
}
