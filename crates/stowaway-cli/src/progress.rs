//! Progress bars for a mirror run
//!
//! One spinner per chart showing the current stage, plus a bar per pull,
//! scan and push stage counting images.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use stowaway_core::{ChartReference, ImageReference};
use stowaway_mirror::{ItemStatus, ProgressObserver, Stage};

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {prefix:.bold} {msg}";
const BAR_TEMPLATE: &str = "  {prefix:>10} [{bar:30.cyan/blue}] {pos}/{len} {msg}";

pub struct ProgressDisplay {
    multi: MultiProgress,
    charts: Mutex<HashMap<String, ProgressBar>>,
    stages: Mutex<HashMap<(String, Stage), ProgressBar>>,
}

impl ProgressDisplay {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            charts: Mutex::new(HashMap::new()),
            stages: Mutex::new(HashMap::new()),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template(SPINNER_TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl Default for ProgressDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ProgressDisplay {
    fn chart_started(&self, chart: &ChartReference) {
        let spinner = self.multi.add(ProgressBar::new_spinner());
        spinner.set_style(Self::spinner_style());
        spinner.set_prefix(chart.name.clone());
        spinner.set_message(format!("{}", style(&chart.version).dim()));
        spinner.enable_steady_tick(Duration::from_millis(120));
        if let Ok(mut charts) = self.charts.lock() {
            charts.insert(chart.name.clone(), spinner);
        }
    }

    fn stage_started(&self, chart: &str, stage: Stage, total: usize) {
        if let Some(spinner) = self.charts.lock().ok().and_then(|c| c.get(chart).cloned()) {
            spinner.set_message(stage.to_string());
        }
        if !stage.is_per_image() || total == 0 {
            return;
        }

        let bar = self.multi.add(ProgressBar::new(total as u64));
        bar.set_style(Self::bar_style());
        bar.set_prefix(stage.to_string());
        if let Ok(mut stages) = self.stages.lock() {
            stages.insert((chart.to_string(), stage), bar);
        }
    }

    fn item_finished(&self, chart: &str, stage: Stage, image: &ImageReference, status: ItemStatus) {
        let Some(bar) = self
            .stages
            .lock()
            .ok()
            .and_then(|s| s.get(&(chart.to_string(), stage)).cloned())
        else {
            return;
        };
        bar.inc(1);
        bar.set_message(image.to_string());
        match status {
            ItemStatus::Succeeded => {}
            ItemStatus::Failed => bar.println(format!("  {} {} {}", style(status.symbol()).red(), stage, image)),
            ItemStatus::Flagged => bar.println(format!("  {} {} {}", style(status.symbol()).yellow(), stage, image)),
        }
    }

    fn stage_finished(&self, chart: &str, stage: Stage) {
        let bar = self
            .stages
            .lock()
            .ok()
            .and_then(|mut s| s.remove(&(chart.to_string(), stage)));
        if let Some(bar) = bar {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }

    fn chart_finished(&self, chart: &str, problems: bool) {
        let spinner = self.charts.lock().ok().and_then(|mut c| c.remove(chart));
        if let Some(spinner) = spinner {
            let icon = if problems {
                style(ItemStatus::Flagged.symbol()).yellow()
            } else {
                style(ItemStatus::Succeeded.symbol()).green()
            };
            spinner.finish_with_message(format!("{} done", icon));
        }
    }
}
