//! Mirror settings
//!
//! Looked up in order: an explicit `--config` file (which must exist),
//! `./stowaway.yaml`, then `~/.config/stowaway/config.yaml`. Every field has
//! a default, so a missing file means defaults.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stowaway_tools::{AuthSettings, ToolBinaries};

use crate::error::{MirrorError, Result};
use crate::retry::RetryPolicy;

/// Settings file name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "stowaway.yaml";

/// Everything a mirror run can be configured with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorSettings {
    pub paths: PathSettings,
    pub image_pull: RetryPolicy,
    pub image_push: RetryPolicy,
    pub chart_push: RetryPolicy,
    /// Concurrent image pulls and pushes per chart
    pub workers: usize,
    pub scan: ScanSettings,
    pub render: RenderSettings,
    pub registries: RegistrySettings,
    pub tools: ToolBinaries,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            paths: PathSettings::default(),
            image_pull: RetryPolicy::image_pull(),
            image_push: RetryPolicy::image_push(),
            chart_push: RetryPolicy::chart_push(),
            workers: 1,
            scan: ScanSettings::default(),
            render: RenderSettings::default(),
            registries: RegistrySettings::default(),
            tools: ToolBinaries::default(),
        }
    }
}

/// Input and output directories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PathSettings {
    /// Chart reference manifests
    pub manifests: PathBuf,
    /// Downloaded chart cache and values overlays
    pub charts: PathBuf,
    /// Rewritten manifests
    pub output: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            manifests: PathBuf::from("./application-sets"),
            charts: PathBuf::from("./helm-charts"),
            output: PathBuf::from("./airgaped-application-sets"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanSettings {
    pub enabled: bool,
    pub severity: String,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            severity: "CRITICAL".to_string(),
        }
    }
}

/// Substitutions applied when rendering templates for discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderSettings {
    pub set: IndexMap<String, String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        let mut set = IndexMap::new();
        set.insert("clusterName".to_string(), "my-cluster-name".to_string());
        Self { set }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistrySettings {
    /// Public registries that need a login before pulling
    pub authenticated_public: Vec<String>,
    /// Hosts serving charts over OCI even without an `oci://` scheme
    pub oci_hosts: Vec<String>,
    pub public_region: String,
    /// Private registry region; asked from the cloud CLI when unset
    pub region: Option<String>,
    pub username: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        let auth = AuthSettings::default();
        Self {
            authenticated_public: auth.authenticated_public,
            oci_hosts: vec!["public.ecr.aws".to_string()],
            public_region: auth.public_region,
            region: None,
            username: auth.username,
        }
    }
}

impl RegistrySettings {
    /// Login settings for a [`stowaway_tools::RegistrySession`]
    pub fn auth(&self) -> AuthSettings {
        AuthSettings {
            authenticated_public: self.authenticated_public.clone(),
            public_region: self.public_region.clone(),
            username: self.username.clone(),
        }
    }
}

impl MirrorSettings {
    /// Load settings, returning the file they came from (if any)
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(MirrorError::Config {
                    message: format!("config file not found: {}", path.display()),
                });
            }
            return Ok((Self::load_from(path)?, Some(path.to_path_buf())));
        }

        let candidates = [Some(PathBuf::from(LOCAL_CONFIG_FILE)), Self::default_path()];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "loading settings");
                return Ok((Self::load_from(&path)?, Some(path)));
            }
        }

        Ok((Self::default(), None))
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content).map_err(|e| MirrorError::Config {
                message: format!("{}: {}", path.display(), e),
            })?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// `<config_dir>/stowaway/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stowaway").join("config.yaml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(MirrorError::Config {
                message: "workers must be at least 1".to_string(),
            });
        }
        if self.scan.severity.trim().is_empty() {
            return Err(MirrorError::Config {
                message: "scan.severity must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = MirrorSettings::default();
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.image_pull, RetryPolicy::new(3, Duration::from_secs(5)));
        assert_eq!(settings.chart_push, RetryPolicy::new(5, Duration::from_secs(10)));
        assert!(settings.scan.enabled);
        assert_eq!(settings.scan.severity, "CRITICAL");
        assert_eq!(settings.render.set["clusterName"], "my-cluster-name");
        assert_eq!(settings.registries.oci_hosts, vec!["public.ecr.aws"]);
        assert_eq!(settings.registries.auth(), AuthSettings::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stowaway.yaml");
        std::fs::write(
            &path,
            r#"
workers: 4
chartPush:
  maxAttempts: 2
  delay: 1s
scan:
  severity: HIGH,CRITICAL
registries:
  region: eu-west-1
tools:
  helm: /opt/helm/bin/helm
"#,
        )
        .unwrap();

        let settings = MirrorSettings::load_from(&path).unwrap();
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.chart_push, RetryPolicy::new(2, Duration::from_secs(1)));
        assert_eq!(settings.image_push, RetryPolicy::image_push());
        assert!(settings.scan.enabled);
        assert_eq!(settings.scan.severity, "HIGH,CRITICAL");
        assert_eq!(settings.registries.region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.registries.username, "AWS");
        assert_eq!(settings.tools.helm, "/opt/helm/bin/helm");
        assert_eq!(settings.tools.docker, "docker");
        assert_eq!(settings.paths, PathSettings::default());
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(MirrorSettings::load_from(&path).unwrap(), MirrorSettings::default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = MirrorSettings::load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, MirrorError::Config { .. }));
    }

    #[test]
    fn test_invalid_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");

        std::fs::write(&path, "workers: 0\n").unwrap();
        assert!(MirrorSettings::load_from(&path).is_err());

        std::fs::write(&path, "workers: [1, 2]\n").unwrap();
        let err = MirrorSettings::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }
}
