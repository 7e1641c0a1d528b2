//! Display formatting for CLI output
//!
//! Provides the end-of-run summary: one block per chart reference manifest,
//! then the run totals.

use console::style;
use stowaway_core::{ChartJob, ChartPushStatus};
use stowaway_mirror::{ChartReport, RunReport};

/// Print every chart of the run, then the totals
pub fn print_run(report: &RunReport) {
    for chart in &report.charts {
        print_chart(chart);
    }
    println!();
    print_summary(report);
}

fn print_chart(chart: &ChartReport) {
    println!();
    println!(
        "{} {}",
        style(&chart.chart.name).cyan().bold(),
        style(format!("({})", chart.manifest.display())).dim()
    );

    if let Some(reason) = &chart.skipped {
        println!("  {} skipped: {}", style("✗").red(), reason);
        if let stowaway_mirror::SkipReason::ResolutionFailed { stderr, .. } = reason {
            print_stderr(stderr);
        }
    }

    if let Some(version) = &chart.resolved_version {
        match &chart.previous_version {
            Some(previous) if previous != version => {
                println!("  {} version {} (was {})", style("✓").green(), version, previous)
            }
            _ => println!("  {} version {}", style("✓").green(), version),
        }
    }

    if let Some(archive) = &chart.archive {
        let origin = if chart.cache_hit { "cached" } else { "downloaded" };
        println!("  {} {} {}", style("✓").green(), origin, style(archive.display()).dim());
    }

    if let Some(job) = &chart.job {
        print_job(job);
    }

    for path in &chart.overlay_skipped {
        println!(
            "  {} values at {} match a mirrored image but cannot be overlaid",
            style("⚠").yellow(),
            style(path).dim()
        );
    }
    for path in &chart.outputs {
        println!("  {} wrote {}", style("✓").green(), path.display());
    }
    for error in &chart.output_errors {
        println!("  {} {}", style("✗").red(), error);
    }
}

fn print_job(job: &ChartJob) {
    let discovered = job.discovered_images().len();
    println!(
        "  {} {} image(s) discovered, {} mirrored, {} pushed",
        style("→").blue(),
        discovered,
        job.mirrored_images().len(),
        job.pushed_images().len()
    );

    for (public, private) in job.mirrored_images() {
        let pushed = job.pushed_images().contains(public);
        let icon = if pushed { style("✓").green() } else { style("·").dim() };
        println!("    {} {} {} {}", icon, public, style("→").dim(), private);
    }

    if !job.failed_pulls().is_empty() {
        println!("  {} failed pulls:", style("✗").red());
        for image in job.failed_pulls() {
            println!("    - {}", image);
        }
    }
    if !job.failed_pushes().is_empty() {
        println!("  {} failed pushes:", style("✗").red());
        for image in job.failed_pushes() {
            println!("    - {}", image);
        }
    }

    match job.chart_push() {
        ChartPushStatus::NotAttempted => println!("  {} chart not pushed", style("·").dim()),
        ChartPushStatus::AlreadyPresent => {
            println!("  {} chart {} already in registry", style("✓").green(), job.version())
        }
        ChartPushStatus::Pushed => println!("  {} chart {} pushed", style("✓").green(), job.version()),
        ChartPushStatus::Failed { reason } => println!("  {} chart push failed: {}", style("✗").red(), reason),
    }

    if !job.vulnerabilities().is_empty() {
        println!("  {} scan findings:", style("⚠").yellow());
        for finding in job.vulnerabilities() {
            println!("    - {}: {}", finding.image, finding.detail);
        }
    }

    if !job.failed_commands().is_empty() {
        println!("  {} failed commands:", style("✗").red());
        for failure in job.failed_commands() {
            println!("    [{}] {}", style(failure.kind).yellow(), failure.message);
            println!("      {} {}", style("$").dim(), failure.command);
            print_stderr(&failure.stderr);
        }
    }
}

fn print_stderr(stderr: &str) {
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        println!("      {}", style(line).dim());
    }
}

fn print_summary(report: &RunReport) {
    let totals = report.totals();
    let mirrored = totals.charts - totals.skipped;
    let line = format!(
        "{} chart(s): {} mirrored, {} skipped; {} image(s) discovered, {} pushed, {} failed pull(s), {} failed push(es), {} finding(s)",
        totals.charts,
        mirrored,
        totals.skipped,
        totals.discovered_images,
        totals.pushed_images,
        totals.failed_pulls,
        totals.failed_pushes,
        totals.vulnerabilities
    );

    if totals.charts == 0 {
        println!("{} No chart manifests matched '{}'", style("⚠").yellow().bold(), report.selector);
    } else if report.has_problems() {
        println!("{} {}", style("⚠").yellow().bold(), line);
    } else {
        println!("{} {}", style("✓").green().bold(), line);
    }
}
