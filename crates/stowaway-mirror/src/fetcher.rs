//! Chart download with an on-disk cache
//!
//! Archives live at `<root>/<name>/<name>-<version>.tgz` and are unpacked
//! next to themselves into `<root>/<name>/<name>/`. A cached archive is never
//! downloaded again; unpacking it again replaces files in place so readers of
//! an earlier tree never find it missing.

use std::path::{Path, PathBuf};
use stowaway_core::ChartReference;
use stowaway_core::archive::{extract_archive, install_tree, place_atomically};
use stowaway_tools::{AuthTarget, RegistrySession};

use crate::error::{MirrorError, Result};

/// A chart archive on disk, unpacked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedChart {
    /// `<root>/<name>/<name>-<version>.tgz`
    pub archive: PathBuf,
    /// `<root>/<name>`
    pub chart_dir: PathBuf,
    /// `<root>/<name>/<name>`
    pub unpacked: PathBuf,
    /// The archive was already cached
    pub cache_hit: bool,
}

impl FetchedChart {
    /// The chart's own default values
    pub fn values_file(&self) -> PathBuf {
        self.unpacked.join("values.yaml")
    }

    /// Where the values overlay for the mirrored chart goes
    pub fn overlay_file(&self) -> PathBuf {
        self.chart_dir.join("values.yaml")
    }
}

pub struct ChartFetcher<'a> {
    session: &'a RegistrySession,
    oci_hosts: &'a [String],
}

impl<'a> ChartFetcher<'a> {
    pub fn new(session: &'a RegistrySession, oci_hosts: &'a [String]) -> Self {
        Self { session, oci_hosts }
    }

    pub async fn fetch(&self, reference: &ChartReference, version: &str, root: &Path) -> Result<FetchedChart> {
        let chart_dir = root.join(&reference.name);
        let archive = reference.archive_path(root, version);
        std::fs::create_dir_all(&chart_dir)?;

        let cache_hit = archive.is_file();
        if cache_hit {
            tracing::info!(chart = %reference.name, version, path = %archive.display(), "using cached chart");
        } else {
            self.download(reference, version, &chart_dir, &archive).await?;
        }

        // Unpacked beside the cache, then moved over any earlier tree file by file
        let staging = tempfile::Builder::new().prefix(".unpack-").tempdir_in(&chart_dir)?;
        extract_archive(&archive, staging.path())?;
        install_tree(staging.path(), &chart_dir)?;
        let unpacked = chart_dir.join(&reference.name);

        Ok(FetchedChart {
            archive,
            chart_dir,
            unpacked,
            cache_hit,
        })
    }

    async fn download(&self, reference: &ChartReference, version: &str, chart_dir: &Path, archive: &Path) -> Result<()> {
        let source = reference.source(self.oci_hosts);
        let login_host = source
            .oci_host()
            .filter(|host| self.session.is_authenticated_public(host));
        if let Some(host) = login_host {
            self.session.ensure(&AuthTarget::package_manager(host)).await?;
        }

        // Staged inside the chart directory so the final move stays on one filesystem
        let staging = tempfile::Builder::new().prefix(".pull-").tempdir_in(chart_dir)?;
        tracing::info!(chart = %reference.name, version, source = %source, "downloading chart");
        self.session
            .tools()
            .package_manager
            .pull(&source, version, staging.path())
            .await?;

        let staged = staging.path().join(reference.archive_name(version));
        if !staged.is_file() {
            return Err(MirrorError::DownloadIncomplete {
                path: archive.display().to_string(),
            });
        }

        if !place_atomically(&staged, archive)? {
            tracing::debug!(chart = %reference.name, version, "another download finished first");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowaway_tools::AuthSettings;
    use stowaway_tools::mock::{MockChart, MockTools};
    use tempfile::TempDir;

    const PRIVATE: &str = "123456789012.dkr.ecr.eu-west-1.amazonaws.com";

    fn reference(repository: &str, namespace: &str) -> ChartReference {
        ChartReference {
            name: "web".to_string(),
            version: "1.0.0".to_string(),
            repository: repository.to_string(),
            namespace: namespace.to_string(),
            release_name: "web".to_string(),
        }
    }

    fn mocks() -> MockTools {
        let mocks = MockTools::new(PRIVATE);
        mocks
            .package_manager
            .add_chart(MockChart::new("web", &["1.0.0"]).with_values("image:\n  repository: nginx\n"));
        mocks
    }

    #[tokio::test]
    async fn test_fetch_twice_pulls_once() {
        let dir = TempDir::new().unwrap();
        let mocks = mocks();
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = vec!["public.ecr.aws".to_string()];
        let fetcher = ChartFetcher::new(&session, &hosts);
        let chart = reference("https://charts.example.com", "");

        let first = fetcher.fetch(&chart, "1.0.0", dir.path()).await.unwrap();
        let first_values = std::fs::read_to_string(first.values_file()).unwrap();
        let second = fetcher.fetch(&chart, "1.0.0", dir.path()).await.unwrap();
        let second_values = std::fs::read_to_string(second.values_file()).unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.archive, second.archive);
        assert_eq!(first.archive, dir.path().join("web").join("web-1.0.0.tgz"));
        assert_eq!(first_values, second_values);
        assert_eq!(mocks.package_manager.operation_counts().pulls, 1);
    }

    #[tokio::test]
    async fn test_cached_archive_is_unpacked_without_pull() {
        let dir = TempDir::new().unwrap();
        let chart_dir = dir.path().join("web");
        std::fs::create_dir_all(&chart_dir).unwrap();
        stowaway_core::archive::write_archive(
            &chart_dir.join("web-1.0.0.tgz"),
            &[("web/values.yaml".to_string(), b"cached: true\n".to_vec())],
        )
        .unwrap();

        let mocks = mocks();
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = Vec::new();
        let fetched = ChartFetcher::new(&session, &hosts)
            .fetch(&reference("https://charts.example.com", ""), "1.0.0", dir.path())
            .await
            .unwrap();

        assert!(fetched.cache_hit);
        assert_eq!(std::fs::read_to_string(fetched.values_file()).unwrap(), "cached: true\n");
        assert_eq!(fetched.overlay_file(), chart_dir.join("values.yaml"));
        assert_eq!(mocks.package_manager.operation_counts().pulls, 0);
    }

    #[tokio::test]
    async fn test_refetch_keeps_unpacked_tree_readable() {
        let dir = TempDir::new().unwrap();
        let mocks = mocks();
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = Vec::new();
        let fetcher = ChartFetcher::new(&session, &hosts);
        let chart = reference("https://charts.example.com", "");

        let first = fetcher.fetch(&chart, "1.0.0", dir.path()).await.unwrap();
        std::fs::write(first.values_file(), "edited: true\n").unwrap();
        std::fs::write(first.unpacked.join("local.txt"), "kept").unwrap();
        let mut reader = std::fs::File::open(first.values_file()).unwrap();

        let second = fetcher.fetch(&chart, "1.0.0", dir.path()).await.unwrap();

        let mut held = String::new();
        std::io::Read::read_to_string(&mut reader, &mut held).unwrap();
        assert_eq!(held, "edited: true\n");
        assert_eq!(
            std::fs::read_to_string(second.values_file()).unwrap(),
            "image:\n  repository: nginx\n"
        );
        assert!(second.unpacked.join("local.txt").exists());

        // No staging directories left behind
        let names: Vec<_> = std::fs::read_dir(&second.chart_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().all(|name| !name.starts_with('.')), "{:?}", names);
    }

    #[tokio::test]
    async fn test_missing_archive_after_pull() {
        let dir = TempDir::new().unwrap();
        let mocks = mocks();
        mocks.package_manager.pull_writes_nothing();
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = Vec::new();

        let err = ChartFetcher::new(&session, &hosts)
            .fetch(&reference("https://charts.example.com", ""), "1.0.0", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::DownloadIncomplete { .. }));

        // Staging directories are cleaned up
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("web")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_public_oci_fetch_logs_in_once() {
        let dir = TempDir::new().unwrap();
        let mocks = mocks();
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let hosts = vec!["public.ecr.aws".to_string()];
        let fetcher = ChartFetcher::new(&session, &hosts);

        let chart = reference("public.ecr.aws/charts", "stable");
        fetcher.fetch(&chart, "1.0.0", dir.path()).await.unwrap();
        std::fs::remove_file(dir.path().join("web").join("web-1.0.0.tgz")).unwrap();
        fetcher.fetch(&chart, "1.0.0", dir.path()).await.unwrap();

        assert_eq!(mocks.package_manager.operation_counts().pulls, 2);
        assert_eq!(mocks.package_manager.operation_counts().logins, 1);
    }
}
