//! Stowaway Core - Core types for mirroring Helm charts into private registries
//!
//! This crate provides the foundational types used throughout Stowaway:
//! - `ImageReference`: Parsed container image references
//! - `ChartReference`: Chart coordinates read from manifests
//! - `ChartJob`: Per-chart mirror bookkeeping
//! - `values`: Sparse values overlays pointing charts at mirrored images
//! - `manifest`: Chart reference manifests and their mirrored rewrite
//! - `archive`: Chart archive extraction and caching

pub mod archive;
pub mod chart;
pub mod document;
pub mod error;
pub mod job;
pub mod manifest;
pub mod reference;
pub mod values;

pub use chart::{ChartReference, ChartSource};
pub use error::{CoreError, Result};
pub use job::{ChartJob, ChartPushStatus, FailedCommand, FailureKind, Vulnerability};
pub use manifest::{AppManifest, discover_manifests, load_manifests};
pub use reference::ImageReference;
pub use values::{ValuesOverlay, parse_set_args};
