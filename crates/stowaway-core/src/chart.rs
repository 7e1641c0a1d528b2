//! Chart references and where to fetch them from

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Immutable description of a chart to mirror, as declared in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartReference {
    /// Chart name
    pub name: String,
    /// Version requested by the manifest
    pub version: String,
    /// Source repository (HTTP(S) chart repository or OCI registry)
    pub repository: String,
    /// Path inside the OCI registry, may be empty
    #[serde(default)]
    pub namespace: String,
    /// Release name, may be empty
    #[serde(default)]
    pub release_name: String,
}

/// Resolved location of a chart for the package manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartSource {
    /// `oci://registry/namespace/name`
    Oci { reference: String, host: String },
    /// Conventional repository with an index, addressed by `--repo`
    Repository { url: String, chart: String },
}

impl ChartSource {
    /// Registry host for OCI sources
    pub fn oci_host(&self) -> Option<&str> {
        match self {
            ChartSource::Oci { host, .. } => Some(host),
            ChartSource::Repository { .. } => None,
        }
    }
}

impl fmt::Display for ChartSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartSource::Oci { reference, .. } => f.write_str(reference),
            ChartSource::Repository { url, chart } => write!(f, "{} (repo {})", chart, url),
        }
    }
}

impl ChartReference {
    /// Pick the fetch source by inspecting the repository URL
    ///
    /// A repository is treated as OCI when it carries the `oci://` scheme or
    /// its host is one of `oci_hosts`.
    pub fn source(&self, oci_hosts: &[String]) -> ChartSource {
        let explicit_oci = self.repository.starts_with("oci://");
        let base = strip_scheme(&self.repository).trim_end_matches('/');
        let host = base.split('/').next().unwrap_or(base);

        if explicit_oci || oci_hosts.iter().any(|h| h == host) {
            let mut reference = format!("oci://{}", base);
            let namespace = self.namespace.trim_matches('/');
            if !namespace.is_empty() {
                reference.push('/');
                reference.push_str(namespace);
            }
            reference.push('/');
            reference.push_str(&self.name);

            ChartSource::Oci {
                reference,
                host: host.to_string(),
            }
        } else {
            ChartSource::Repository {
                url: self.repository.clone(),
                chart: self.name.clone(),
            }
        }
    }

    /// File name of the packaged chart for a version
    pub fn archive_name(&self, version: &str) -> String {
        format!("{}-{}.tgz", self.name, version)
    }

    /// Cache location `<root>/<name>/<name>-<version>.tgz`
    pub fn archive_path(&self, root: &Path, version: &str) -> PathBuf {
        root.join(&self.name).join(self.archive_name(version))
    }
}

impl fmt::Display for ChartReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

fn strip_scheme(url: &str) -> &str {
    url.trim_start_matches("oci://")
        .trim_start_matches("https://")
        .trim_start_matches("http://")
}
