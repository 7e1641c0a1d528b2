//! Stowaway Mirror - the chart airgapping pipeline
//!
//! This crate provides:
//! - **Resolution**: pick the chart version to mirror, pinned or latest
//! - **Fetching**: download charts into an on-disk cache with atomic placement
//! - **Discovery**: find every image a chart's rendered templates reference
//! - **Image mirroring**: bounded-concurrency pull, scan and push with retries
//! - **Chart mirroring**: push the chart archive to the private registry
//! - **Pipeline**: run all of the above per chart reference manifest and
//!   aggregate a [`RunReport`]
//! - **Progress**: observer hooks for per-stage and per-image progress

pub mod chart_push;
pub mod config;
pub mod discover;
pub mod error;
pub mod fetcher;
pub mod images;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod resolver;
pub mod retry;

pub use chart_push::ChartMirror;
pub use config::{MirrorSettings, PathSettings, RegistrySettings, RenderSettings, ScanSettings};
pub use discover::{ImageDiscoverer, images_in_stream};
pub use error::{MirrorError, Result};
pub use fetcher::{ChartFetcher, FetchedChart};
pub use images::{ImageMirror, ensure_repository};
pub use pipeline::{Pipeline, RunOptions};
pub use progress::{ItemStatus, NoopObserver, ProgressObserver, Stage};
pub use report::{ChartReport, RunReport, RunTotals, SkipReason};
pub use resolver::{ChartResolver, Resolution};
pub use retry::{Exhausted, RetryPolicy};
