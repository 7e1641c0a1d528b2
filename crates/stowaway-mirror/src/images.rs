//! Image pull, scan and push
//!
//! Images are independent of each other, so pulls and pushes run through a
//! bounded pool of `workers` futures. Each worker only talks to the tools;
//! its outcome is merged into the [`ChartJob`] by the orchestrating task.

use futures::stream::{self, StreamExt};
use stowaway_core::{ChartJob, FailedCommand, FailureKind, ImageReference, Vulnerability};
use stowaway_tools::{CreateOutcome, Lookup, RegistryApi, RegistrySession, ScanVerdict, ToolError};

use crate::error::{MirrorError, Result, failed_command};
use crate::progress::{ItemStatus, ProgressObserver, Stage};
use crate::retry::RetryPolicy;

/// Make sure registry repository `name` exists, creating it if needed
pub async fn ensure_repository(registry: &dyn RegistryApi, name: &str) -> Result<()> {
    match registry.describe_repository(name).await {
        Lookup::Exists => Ok(()),
        Lookup::NotFound => match registry.create_repository(name).await {
            Ok(CreateOutcome::Created) => {
                tracing::info!(repository = name, "created registry repository");
                Ok(())
            }
            Ok(CreateOutcome::AlreadyExists) => Ok(()),
            Err(e) => Err(MirrorError::RegistryProvisioning {
                repository: name.to_string(),
                detail: e.to_string(),
            }),
        },
        Lookup::Failed(detail) => Err(MirrorError::RegistryProvisioning {
            repository: name.to_string(),
            detail,
        }),
    }
}

/// A failed image, with the log entry to keep (if any)
struct ImageFailure(Option<FailedCommand>);

impl ImageFailure {
    fn tool(kind: FailureKind, error: &ToolError, fallback_command: &str) -> Self {
        if error.is_reportable() {
            Self(Some(failed_command(kind, error, fallback_command)))
        } else {
            Self(None)
        }
    }

    fn record_into(self, job: &mut ChartJob) {
        if let Some(failure) = self.0 {
            job.record_command(failure);
        }
    }
}

pub struct ImageMirror<'a> {
    session: &'a RegistrySession,
    observer: &'a dyn ProgressObserver,
    workers: usize,
}

impl<'a> ImageMirror<'a> {
    pub fn new(session: &'a RegistrySession, observer: &'a dyn ProgressObserver, workers: usize) -> Self {
        Self {
            session,
            observer,
            workers: workers.max(1),
        }
    }

    /// Pull every discovered, reachable image
    pub async fn pull(&self, job: &mut ChartJob, policy: &RetryPolicy) {
        let chart = job.chart_name().to_string();
        let candidates = job.pull_candidates();
        self.observer.stage_started(&chart, Stage::Pull, candidates.len());

        let mut outcomes = stream::iter(candidates)
            .map(|image| async move {
                let outcome = self.pull_one(&image, policy).await;
                (image, outcome)
            })
            .buffer_unordered(self.workers);

        while let Some((image, outcome)) = outcomes.next().await {
            match outcome {
                Ok(()) => {
                    let private = job.record_pull_success(&image);
                    tracing::info!(image = %image, private = %private, "pulled image");
                    self.observer.item_finished(&chart, Stage::Pull, &image, ItemStatus::Succeeded);
                }
                Err(failure) => {
                    job.record_pull_failure(&image);
                    failure.record_into(job);
                    self.observer.item_finished(&chart, Stage::Pull, &image, ItemStatus::Failed);
                }
            }
        }

        self.observer.stage_finished(&chart, Stage::Pull);
    }

    async fn pull_one(&self, image: &ImageReference, policy: &RetryPolicy) -> std::result::Result<(), ImageFailure> {
        if let Err(e) = self.session.ensure_engine_for(image).await {
            return Err(ImageFailure::tool(FailureKind::Authentication, &e, "docker login"));
        }

        let engine = &self.session.tools().engine;
        let label = format!("pull {}", image);
        policy
            .run(&label, |_| engine.pull(image))
            .await
            .map_err(|exhausted| {
                ImageFailure::tool(
                    FailureKind::PullExhausted,
                    &exhausted.last,
                    &format!("docker pull {}", image),
                )
            })
    }

    /// Scan every pulled image; findings never block the push
    pub async fn scan(&self, job: &mut ChartJob, severity: &str) {
        let chart = job.chart_name().to_string();
        let images: Vec<ImageReference> = job.mirrored_images().keys().cloned().collect();
        self.observer.stage_started(&chart, Stage::Scan, images.len());

        let scanner = &self.session.tools().scanner;
        for image in images {
            let status = match scanner.scan(&image, severity).await {
                Ok(ScanVerdict::Pass) => ItemStatus::Succeeded,
                Ok(ScanVerdict::Fail { detail, output }) => {
                    tracing::warn!(image = %image, severity, "vulnerabilities found");
                    job.record_vulnerability(Vulnerability {
                        image: image.clone(),
                        detail,
                        output,
                    });
                    ItemStatus::Flagged
                }
                Err(e) => {
                    tracing::error!(image = %image, error = %e, "scanner could not run");
                    job.record_command(failed_command(
                        FailureKind::Command,
                        &e,
                        &format!("trivy image {}", image),
                    ));
                    ItemStatus::Failed
                }
            };
            self.observer.item_finished(&chart, Stage::Scan, &image, status);
        }

        self.observer.stage_finished(&chart, Stage::Scan);
    }

    /// Push every pulled image to its private location
    pub async fn push(&self, job: &mut ChartJob, policy: &RetryPolicy) {
        let chart = job.chart_name().to_string();
        let candidates = job.push_candidates();
        self.observer.stage_started(&chart, Stage::Push, candidates.len());

        let chart_name = chart.as_str();
        let mut outcomes = stream::iter(candidates)
            .map(|(public, private)| async move {
                let outcome = self.push_one(chart_name, &public, &private, policy).await;
                (public, outcome)
            })
            .buffer_unordered(self.workers);

        while let Some((image, outcome)) = outcomes.next().await {
            match outcome {
                Ok(()) => {
                    job.record_push_success(&image);
                    self.observer.item_finished(&chart, Stage::Push, &image, ItemStatus::Succeeded);
                }
                Err(failure) => {
                    job.record_push_failure(&image);
                    failure.record_into(job);
                    self.observer.item_finished(&chart, Stage::Push, &image, ItemStatus::Failed);
                }
            }
        }

        self.observer.stage_finished(&chart, Stage::Push);
    }

    async fn push_one(
        &self,
        chart: &str,
        public: &ImageReference,
        private: &ImageReference,
        policy: &RetryPolicy,
    ) -> std::result::Result<(), ImageFailure> {
        let tools = self.session.tools();

        if let Err(e) = tools.engine.tag(public, private).await {
            return Err(ImageFailure::tool(
                FailureKind::Command,
                &e,
                &format!("docker tag {} {}", public, private),
            ));
        }

        let repository = format!("{}/{}", chart, public.basename());
        if let Err(e) = ensure_repository(tools.registry.as_ref(), &repository).await {
            tracing::error!(image = %public, error = %e, "registry repository unavailable");
            return Err(ImageFailure(Some(FailedCommand {
                kind: FailureKind::RegistryProvisioning,
                command: format!("aws ecr create-repository --repository-name {}", repository),
                message: e.to_string(),
                stderr: e.stderr().to_string(),
            })));
        }

        if let Err(e) = self.session.ensure_private_engine().await {
            return Err(ImageFailure::tool(FailureKind::Authentication, &e, "docker login"));
        }

        let engine = &tools.engine;
        let label = format!("push {}", private);
        match policy.run(&label, |_| engine.push(private)).await {
            Ok(()) => {
                tracing::info!(image = %public, private = %private, "pushed image");
                Ok(())
            }
            Err(exhausted) => Err(ImageFailure::tool(
                FailureKind::PushExhausted,
                &exhausted.last,
                &format!("docker push {}", private),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopObserver;
    use stowaway_core::ChartReference;
    use stowaway_tools::AuthSettings;
    use stowaway_tools::mock::{MockRegistry, MockTools};

    const PRIVATE: &str = "123456789012.dkr.ecr.eu-west-1.amazonaws.com";

    fn job_with(images: &[&str]) -> ChartJob {
        let reference = ChartReference {
            name: "web".to_string(),
            version: "1.0.0".to_string(),
            repository: "https://charts.example.com".to_string(),
            namespace: String::new(),
            release_name: String::new(),
        };
        let mut job = ChartJob::new(reference, "1.0.0", PRIVATE);
        for image in images {
            job.record_discovered(&ImageReference::parse(image).unwrap());
        }
        job
    }

    fn image(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_repository_outcomes() {
        let registry = MockRegistry::new(PRIVATE);
        registry.add_repository("web/nginx");
        registry.break_repository("web/locked");

        ensure_repository(&registry, "web/nginx").await.unwrap();
        ensure_repository(&registry, "web/redis").await.unwrap();
        let err = ensure_repository(&registry, "web/locked").await.unwrap_err();

        assert!(matches!(err, MirrorError::RegistryProvisioning { ref repository, .. } if repository == "web/locked"));
        assert_eq!(registry.repositories(), vec!["web/nginx", "web/redis"]);
        assert_eq!(registry.operation_counts().creates, 1);
    }

    #[tokio::test]
    async fn test_pull_retries_then_records_failure() {
        let mocks = MockTools::new(PRIVATE);
        mocks.engine.fail_pull("docker.io/bitnami/redis:7.2", usize::MAX);
        mocks.engine.fail_pull("docker.io/bitnami/nginx:1.25", 1);
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let mut job = job_with(&["docker.io/bitnami/nginx:1.25", "docker.io/bitnami/redis:7.2"]);

        ImageMirror::new(&session, &NoopObserver, 1)
            .pull(&mut job, &RetryPolicy::immediate(3))
            .await;

        let nginx = image("docker.io/bitnami/nginx:1.25");
        let redis = image("docker.io/bitnami/redis:7.2");
        assert_eq!(job.mirrored_images()[&nginx].to_string(), format!("{}/web/nginx:1.25", PRIVATE));
        assert!(job.failed_pulls().contains(&redis));
        assert!(!job.mirrored_images().contains_key(&redis));
        // One retry for nginx, three attempts for redis
        assert_eq!(mocks.engine.operation_counts().pulls, 5);
        assert_eq!(job.failed_commands().len(), 1);
        assert_eq!(job.failed_commands()[0].kind, FailureKind::PullExhausted);
        assert_eq!(job.failed_commands()[0].command, "docker pull docker.io/bitnami/redis:7.2");
    }

    #[tokio::test]
    async fn test_each_mirrored_image_pushed_once() {
        let mocks = MockTools::new(PRIVATE);
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let mut job = job_with(&[
            "docker.io/bitnami/nginx:1.25",
            "docker.io/bitnami/redis:7.2",
            "quay.io/prometheus/node-exporter:v1.8.0",
        ]);
        let mirror = ImageMirror::new(&session, &NoopObserver, 4);

        mirror.pull(&mut job, &RetryPolicy::immediate(3)).await;
        mirror.push(&mut job, &RetryPolicy::immediate(3)).await;

        assert_eq!(job.pushed_images().len(), 3);
        assert!(job.failed_pushes().is_empty());
        let counts = mocks.engine.operation_counts();
        assert_eq!(counts.tags, 3);
        assert_eq!(counts.pushes, 3);
        // A single private login shared by every worker
        assert_eq!(counts.logins, 1);
        assert_eq!(
            mocks.registry.repositories(),
            vec!["web/nginx", "web/node-exporter", "web/redis"]
        );
    }

    #[tokio::test]
    async fn test_push_failures_are_per_image() {
        let mocks = MockTools::new(PRIVATE);
        mocks.registry.break_repository("web/redis");
        mocks
            .engine
            .fail_push(&format!("{}/web/busybox:1.36", PRIVATE), usize::MAX);
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let mut job = job_with(&[
            "docker.io/bitnami/nginx:1.25",
            "docker.io/bitnami/redis:7.2",
            "busybox:1.36",
        ]);
        let mirror = ImageMirror::new(&session, &NoopObserver, 2);

        mirror.pull(&mut job, &RetryPolicy::immediate(2)).await;
        mirror.push(&mut job, &RetryPolicy::immediate(2)).await;

        let nginx = image("docker.io/bitnami/nginx:1.25");
        let redis = image("docker.io/bitnami/redis:7.2");
        let busybox = image("busybox:1.36");
        assert!(job.pushed_images().contains(&nginx));
        assert!(job.failed_pushes().contains(&redis));
        assert!(job.failed_pushes().contains(&busybox));
        assert!(!job.pushed_images().contains(&busybox));

        let kinds: Vec<FailureKind> = job.failed_commands().iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&FailureKind::RegistryProvisioning));
        assert!(kinds.contains(&FailureKind::PushExhausted));
        // redis never reached the push; busybox was tried twice, nginx once
        assert_eq!(mocks.engine.operation_counts().pushes, 3);
    }

    #[tokio::test]
    async fn test_push_skips_failed_pulls() {
        let mocks = MockTools::new(PRIVATE);
        mocks.engine.fail_pull("docker.io/bitnami/redis:7.2", usize::MAX);
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let mut job = job_with(&["docker.io/bitnami/nginx:1.25", "docker.io/bitnami/redis:7.2"]);
        let mirror = ImageMirror::new(&session, &NoopObserver, 1);

        mirror.pull(&mut job, &RetryPolicy::immediate(1)).await;
        mirror.push(&mut job, &RetryPolicy::immediate(1)).await;

        assert_eq!(mocks.engine.pushed(), vec![format!("{}/web/nginx:1.25", PRIVATE)]);
        assert!(job.failed_pushes().is_empty());
    }

    #[tokio::test]
    async fn test_scan_findings_keep_image_pushable() {
        let mocks = MockTools::new(PRIVATE);
        mocks.scanner.mark_vulnerable("docker.io/bitnami/nginx:1.25");
        let session = RegistrySession::new(mocks.toolbox(), AuthSettings::default());
        let mut job = job_with(&["docker.io/bitnami/nginx:1.25", "docker.io/bitnami/redis:7.2"]);
        let mirror = ImageMirror::new(&session, &NoopObserver, 1);

        mirror.pull(&mut job, &RetryPolicy::immediate(1)).await;
        mirror.scan(&mut job, "CRITICAL").await;

        assert_eq!(job.vulnerabilities().len(), 1);
        assert_eq!(job.vulnerabilities()[0].image, image("docker.io/bitnami/nginx:1.25"));
        assert_eq!(mocks.scanner.scanned().len(), 2);
        assert_eq!(job.push_candidates().len(), 2);
    }
}
