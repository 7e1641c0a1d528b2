//! Chart archive push to the private registry

use std::path::Path;
use stowaway_core::{ChartJob, ChartPushStatus, FailedCommand, FailureKind};
use stowaway_tools::{Lookup, RegistrySession};

use crate::error::failed_command;
use crate::images::ensure_repository;
use crate::progress::{ProgressObserver, Stage};
use crate::retry::RetryPolicy;

pub struct ChartMirror<'a> {
    session: &'a RegistrySession,
    observer: &'a dyn ProgressObserver,
}

impl<'a> ChartMirror<'a> {
    pub fn new(session: &'a RegistrySession, observer: &'a dyn ProgressObserver) -> Self {
        Self { session, observer }
    }

    /// Push `archive` unless the registry already holds this chart version
    ///
    /// The outcome lands in the job's chart push status; nothing here aborts
    /// the run.
    pub async fn push(&self, job: &mut ChartJob, archive: &Path, policy: &RetryPolicy) {
        let chart = job.chart_name().to_string();
        self.observer.stage_started(&chart, Stage::ChartPush, 1);

        let status = self.push_inner(job, archive, policy).await;
        match &status {
            ChartPushStatus::Failed { reason } => {
                tracing::error!(chart = %chart, version = %job.version(), reason = %reason, "chart push failed")
            }
            other => tracing::info!(chart = %chart, version = %job.version(), status = ?other, "chart push done"),
        }
        job.set_chart_push(status);

        self.observer.stage_finished(&chart, Stage::ChartPush);
    }

    async fn push_inner(&self, job: &mut ChartJob, archive: &Path, policy: &RetryPolicy) -> ChartPushStatus {
        let tools = self.session.tools();
        let chart = job.chart_name().to_string();
        let version = job.version().to_string();

        match tools.registry.describe_image(&chart, &version).await {
            Lookup::Exists => return ChartPushStatus::AlreadyPresent,
            Lookup::NotFound => {}
            Lookup::Failed(detail) => {
                job.record_command(FailedCommand {
                    kind: FailureKind::ChartPush,
                    command: format!("aws ecr describe-images --repository-name {} --image-ids imageTag={}", chart, version),
                    message: format!("Unable to check whether {} {} is already mirrored", chart, version),
                    stderr: detail.clone(),
                });
                return ChartPushStatus::Failed { reason: detail };
            }
        }

        if let Err(e) = ensure_repository(tools.registry.as_ref(), &chart).await {
            job.record_command(FailedCommand {
                kind: FailureKind::RegistryProvisioning,
                command: format!("aws ecr create-repository --repository-name {}", chart),
                message: e.to_string(),
                stderr: String::new(),
            });
            return ChartPushStatus::Failed { reason: e.to_string() };
        }

        if let Err(e) = self.session.ensure_private_package_manager().await {
            job.record_command(failed_command(FailureKind::Authentication, &e, "helm registry login"));
            return ChartPushStatus::Failed { reason: e.to_string() };
        }

        let registry = job.private_registry().to_string();
        let package_manager = &tools.package_manager;
        let label = format!("push chart {}-{}", chart, version);
        match policy
            .run(&label, |_| package_manager.push(archive, &registry))
            .await
        {
            Ok(()) => ChartPushStatus::Pushed,
            Err(exhausted) => {
                if exhausted.last.is_reportable() {
                    job.record_command(failed_command(
                        FailureKind::ChartPush,
                        &exhausted.last,
                        &format!("helm push {} oci://{}", archive.display(), registry),
                    ));
                }
                ChartPushStatus::Failed {
                    reason: exhausted.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopObserver;
    use stowaway_core::ChartReference;
    use stowaway_tools::AuthSettings;
    use stowaway_tools::mock::{MockChart, MockTools};

    const PRIVATE: &str = "123456789012.dkr.ecr.eu-west-1.amazonaws.com";

    fn job() -> ChartJob {
        let reference = ChartReference {
            name: "web".to_string(),
            version: "1.0.0".to_string(),
            repository: "https://charts.example.com".to_string(),
            namespace: String::new(),
            release_name: String::new(),
        };
        ChartJob::new(reference, "1.0.0", PRIVATE)
    }

    fn mocks() -> MockTools {
        let mocks = MockTools::new(PRIVATE);
        mocks.package_manager.add_chart(MockChart::new("web", &["1.0.0"]));
        mocks
    }

    #[tokio::test]
    async fn test_pushes_new_chart() {
        let mocks = mocks();
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let mut job = job();
        let archive = Path::new("/charts/web/web-1.0.0.tgz");

        ChartMirror::new(&session, &NoopObserver)
            .push(&mut job, archive, &RetryPolicy::immediate(5))
            .await;

        assert_eq!(job.chart_push(), &ChartPushStatus::Pushed);
        assert_eq!(
            mocks.package_manager.pushed(),
            vec![(archive.to_path_buf(), PRIVATE.to_string())]
        );
        assert_eq!(mocks.registry.repositories(), vec!["web"]);
        assert_eq!(mocks.package_manager.operation_counts().logins, 1);
    }

    #[tokio::test]
    async fn test_existing_chart_is_not_pushed() {
        let mocks = mocks();
        mocks.registry.add_image("web", "1.0.0");
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let mut job = job();

        ChartMirror::new(&session, &NoopObserver)
            .push(&mut job, Path::new("/charts/web/web-1.0.0.tgz"), &RetryPolicy::immediate(5))
            .await;

        assert_eq!(job.chart_push(), &ChartPushStatus::AlreadyPresent);
        assert_eq!(mocks.package_manager.operation_counts().pushes, 0);
    }

    #[tokio::test]
    async fn test_push_retries_then_fails() {
        let mocks = mocks();
        mocks.package_manager.fail_push("web", usize::MAX);
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let mut job = job();

        ChartMirror::new(&session, &NoopObserver)
            .push(&mut job, Path::new("/charts/web/web-1.0.0.tgz"), &RetryPolicy::immediate(5))
            .await;

        assert!(matches!(job.chart_push(), ChartPushStatus::Failed { reason } if reason.contains("after 5 attempts")));
        assert_eq!(mocks.package_manager.operation_counts().pushes, 5);
        assert_eq!(job.failed_commands().len(), 1);
        assert_eq!(job.failed_commands()[0].kind, FailureKind::ChartPush);
    }

    #[tokio::test]
    async fn test_registry_lookup_failure() {
        let mocks = mocks();
        mocks.registry.break_repository("web");
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let mut job = job();

        ChartMirror::new(&session, &NoopObserver)
            .push(&mut job, Path::new("/charts/web/web-1.0.0.tgz"), &RetryPolicy::immediate(5))
            .await;

        assert!(matches!(job.chart_push(), ChartPushStatus::Failed { .. }));
        assert_eq!(mocks.package_manager.operation_counts().pushes, 0);
    }
}
