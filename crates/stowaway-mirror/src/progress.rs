//! Progress events emitted while a run proceeds
//!
//! The pipeline reports chart and per-image progress through a
//! [`ProgressObserver`]. The CLI renders them as progress bars; library users
//! and tests can pass [`NoopObserver`].

use std::fmt;
use stowaway_core::{ChartReference, ImageReference};

/// Pipeline stage of one chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    Fetch,
    Discover,
    Pull,
    Scan,
    Push,
    ChartPush,
    Values,
}

impl Stage {
    /// Stages that report one event per image
    pub fn is_per_image(&self) -> bool {
        matches!(self, Stage::Pull | Stage::Scan | Stage::Push)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Discover => "discover",
            Stage::Pull => "pull",
            Stage::Scan => "scan",
            Stage::Push => "push",
            Stage::ChartPush => "chart push",
            Stage::Values => "values",
        };
        f.write_str(name)
    }
}

/// How one image fared in a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Succeeded,
    Failed,
    /// Scanned with findings; still eligible for push
    Flagged,
}

impl ItemStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            ItemStatus::Succeeded => "✓",
            ItemStatus::Failed => "✗",
            ItemStatus::Flagged => "⚠",
        }
    }
}

/// Receives progress events; every method defaults to doing nothing
pub trait ProgressObserver: Send + Sync {
    fn chart_started(&self, _chart: &ChartReference) {}

    /// A stage begins; `total` is the number of images for per-image stages
    fn stage_started(&self, _chart: &str, _stage: Stage, _total: usize) {}

    fn item_finished(&self, _chart: &str, _stage: Stage, _image: &ImageReference, _status: ItemStatus) {}

    fn stage_finished(&self, _chart: &str, _stage: Stage) {}

    /// The chart is done; `problems` tells whether anything failed or was flagged
    fn chart_finished(&self, _chart: &str, _problems: bool) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl ProgressObserver for Recording {
        fn stage_started(&self, chart: &str, stage: Stage, total: usize) {
            self.events.lock().unwrap().push(format!("{} {} start {}", chart, stage, total));
        }

        fn item_finished(&self, _chart: &str, stage: Stage, image: &ImageReference, status: ItemStatus) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{} {} {}", stage, status.symbol(), image));
        }
    }

    #[test]
    fn test_default_methods_are_optional() {
        let recording = Recording::default();
        let image = ImageReference::parse("nginx:1.25").unwrap();

        recording.stage_started("web", Stage::Pull, 1);
        recording.item_finished("web", Stage::Pull, &image, ItemStatus::Succeeded);
        recording.stage_finished("web", Stage::Pull);
        recording.chart_finished("web", false);

        assert_eq!(
            *recording.events.lock().unwrap(),
            vec!["web pull start 1".to_string(), "pull ✓ nginx:1.25".to_string()]
        );
    }

    #[test]
    fn test_stage_kinds() {
        assert!(Stage::Pull.is_per_image());
        assert!(Stage::Scan.is_per_image());
        assert!(!Stage::ChartPush.is_per_image());
        assert_eq!(Stage::ChartPush.to_string(), "chart push");
    }
}
