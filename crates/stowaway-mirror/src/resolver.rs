//! Chart version resolution
//!
//! Asks the package manager which version a chart reference resolves to.
//! With a pinned version the answer must match exactly; following latest
//! accepts whatever comes back and records the version it replaced.

use std::cmp::Ordering;
use stowaway_core::ChartReference;
use stowaway_tools::{AuthTarget, RegistrySession};

use crate::error::{MirrorError, Result};

/// Outcome of a version query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Use `version`; `previous` is the pinned version it replaced, if different
    Resolved { version: String, previous: Option<String> },
    /// The pinned version is not what the repository serves
    NotAvailable { requested: String, available: String },
}

/// Direction of a version change, when both sides are semver
pub fn version_change(from: &str, to: &str) -> Option<Ordering> {
    let from = semver::Version::parse(from.trim_start_matches('v')).ok()?;
    let to = semver::Version::parse(to.trim_start_matches('v')).ok()?;
    Some(to.cmp(&from))
}

pub struct ChartResolver<'a> {
    session: &'a RegistrySession,
    oci_hosts: &'a [String],
}

impl<'a> ChartResolver<'a> {
    pub fn new(session: &'a RegistrySession, oci_hosts: &'a [String]) -> Self {
        Self { session, oci_hosts }
    }

    pub async fn resolve(&self, reference: &ChartReference, want_latest: bool) -> Result<Resolution> {
        let source = reference.source(self.oci_hosts);

        let login_host = source
            .oci_host()
            .filter(|host| self.session.is_authenticated_public(host));
        if let Some(host) = login_host {
            self.session
                .ensure(&AuthTarget::package_manager(host))
                .await
                .map_err(|e| MirrorError::ResolutionFailed {
                    chart: reference.name.clone(),
                    source: e,
                })?;
        }

        let requested = (!want_latest).then_some(reference.version.as_str());
        let metadata = self
            .session
            .tools()
            .package_manager
            .show_chart(&source, requested)
            .await
            .map_err(|e| MirrorError::ResolutionFailed {
                chart: reference.name.clone(),
                source: e,
            })?;

        let available = metadata.version;
        if want_latest {
            if available == reference.version {
                tracing::info!(chart = %reference.name, version = %available, "already at latest version");
                return Ok(Resolution::Resolved {
                    version: available,
                    previous: None,
                });
            }

            match version_change(&reference.version, &available) {
                Some(Ordering::Less) => tracing::warn!(
                    chart = %reference.name,
                    from = %reference.version,
                    to = %available,
                    "latest version is a downgrade"
                ),
                _ => tracing::info!(
                    chart = %reference.name,
                    from = %reference.version,
                    to = %available,
                    "following latest version"
                ),
            }
            return Ok(Resolution::Resolved {
                version: available,
                previous: Some(reference.version.clone()),
            });
        }

        if available == reference.version {
            tracing::info!(chart = %reference.name, version = %available, "pinned version available");
            Ok(Resolution::Resolved {
                version: available,
                previous: None,
            })
        } else {
            tracing::warn!(
                chart = %reference.name,
                requested = %reference.version,
                available = %available,
                "pinned version not available"
            );
            Ok(Resolution::NotAvailable {
                requested: reference.version.clone(),
                available,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowaway_tools::AuthSettings;
    use stowaway_tools::mock::{MockChart, MockTools};

    const PRIVATE: &str = "123456789012.dkr.ecr.eu-west-1.amazonaws.com";

    fn reference(name: &str, version: &str, repository: &str) -> ChartReference {
        ChartReference {
            name: name.to_string(),
            version: version.to_string(),
            repository: repository.to_string(),
            namespace: String::new(),
            release_name: String::new(),
        }
    }

    fn oci_hosts() -> Vec<String> {
        vec!["public.ecr.aws".to_string()]
    }

    #[tokio::test]
    async fn test_pinned_version_matches() {
        let mocks = MockTools::new(PRIVATE);
        mocks.package_manager.add_chart(MockChart::new("web", &["1.0.0", "1.1.0"]));
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = oci_hosts();
        let resolver = ChartResolver::new(&session, &hosts);

        let resolution = resolver
            .resolve(&reference("web", "1.0.0", "https://charts.example.com"), false)
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Resolved {
                version: "1.0.0".to_string(),
                previous: None
            }
        );
    }

    #[tokio::test]
    async fn test_pinned_range_resolving_elsewhere_is_not_available() {
        let mocks = MockTools::new(PRIVATE);
        mocks.package_manager.add_chart(MockChart::new("web", &["1.0.0", "1.0.3"]));
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = oci_hosts();
        let resolver = ChartResolver::new(&session, &hosts);

        let resolution = resolver
            .resolve(&reference("web", "~1.0", "https://charts.example.com"), false)
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::NotAvailable {
                requested: "~1.0".to_string(),
                available: "1.0.3".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_latest_records_previous() {
        let mocks = MockTools::new(PRIVATE);
        mocks.package_manager.add_chart(MockChart::new("web", &["1.0.0", "1.2.0"]));
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = oci_hosts();
        let resolver = ChartResolver::new(&session, &hosts);

        let resolution = resolver
            .resolve(&reference("web", "1.0.0", "https://charts.example.com"), true)
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Resolved {
                version: "1.2.0".to_string(),
                previous: Some("1.0.0".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_chart_is_resolution_failure() {
        let mocks = MockTools::new(PRIVATE);
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = oci_hosts();
        let resolver = ChartResolver::new(&session, &hosts);

        let err = resolver
            .resolve(&reference("ghost", "1.0.0", "https://charts.example.com"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::ResolutionFailed { ref chart, .. } if chart == "ghost"));
        assert!(err.stderr().contains("repository not found"));
    }

    #[tokio::test]
    async fn test_public_oci_source_logs_package_manager_in() {
        let mocks = MockTools::new(PRIVATE);
        mocks.package_manager.add_chart(MockChart::new("karpenter", &["1.0.1"]));
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = oci_hosts();
        let resolver = ChartResolver::new(&session, &hosts);

        resolver
            .resolve(&reference("karpenter", "1.0.1", "public.ecr.aws/karpenter"), false)
            .await
            .unwrap();
        assert!(
            session
                .is_authenticated(&AuthTarget::package_manager("public.ecr.aws"))
                .await
        );

        // Conventional repositories need no login
        mocks.package_manager.add_chart(MockChart::new("web", &["1.0.0"]));
        resolver
            .resolve(&reference("web", "1.0.0", "https://charts.example.com"), false)
            .await
            .unwrap();
        assert_eq!(mocks.package_manager.operation_counts().logins, 1);
    }

    #[test]
    fn test_version_change() {
        assert_eq!(version_change("1.0.0", "1.2.0"), Some(Ordering::Greater));
        assert_eq!(version_change("v2.0.0", "1.9.9"), Some(Ordering::Less));
        assert_eq!(version_change("latest", "1.0.0"), None);
    }
}
