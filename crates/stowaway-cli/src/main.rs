//! Stowaway CLI - mirror Helm charts and their images into a private registry

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stowaway_mirror::RunOptions;

mod commands;
mod display;
mod error;
mod exit_codes;
mod logging;
mod progress;

use commands::mirror::Overrides;

#[derive(Parser)]
#[command(name = "stowaway")]
#[command(author = "Stowaway Contributors")]
#[command(version)]
#[command(about = "Mirror Helm charts and the images they reference into a private registry", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Settings file (default: ./stowaway.yaml, then ~/.config/stowaway/config.yaml)
    #[arg(long, global = true, env = "STOWAWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror every chart whose manifest path contains the selector
    Mirror {
        /// Manifest path selector (e.g. an environment directory name)
        #[arg(long, env = "STOWAWAY_APPSPEC")]
        appspec: String,

        /// Mirror the newest chart version instead of the pinned one
        #[arg(long, env = "STOWAWAY_LATEST")]
        latest: bool,

        /// Only pull and scan; write no manifests or values
        #[arg(long, env = "STOWAWAY_SCAN_ONLY")]
        scan_only: bool,

        /// Push images and chart even with --scan-only
        #[arg(long, env = "STOWAWAY_PUSH_IMAGES")]
        push_images: bool,

        /// Do not scan images
        #[arg(long, env = "STOWAWAY_SKIP_SCAN")]
        skip_scan: bool,

        /// Concurrent image pulls and pushes per chart
        #[arg(long, env = "STOWAWAY_WORKERS")]
        workers: Option<usize>,

        /// Chart reference manifests directory
        #[arg(long, env = "STOWAWAY_MANIFESTS")]
        manifests: Option<PathBuf>,

        /// Chart cache directory
        #[arg(long, env = "STOWAWAY_CHARTS")]
        charts: Option<PathBuf>,

        /// Directory for rewritten manifests
        #[arg(long, env = "STOWAWAY_OUTPUT")]
        output: Option<PathBuf>,

        /// Write a JSON run report to this file
        #[arg(long, env = "STOWAWAY_REPORT")]
        report: Option<PathBuf>,
    },

    /// List chart references found in manifests
    List {
        /// Manifest path selector
        #[arg(long, env = "STOWAWAY_APPSPEC", default_value = "")]
        appspec: String,

        /// Chart reference manifests directory
        #[arg(long, env = "STOWAWAY_MANIFESTS")]
        manifests: Option<PathBuf>,
    },

    /// Render a local chart and list the images it references
    Images {
        /// Chart directory or archive
        chart: PathBuf,

        /// Set values on command line (key=value)
        #[arg(long = "set")]
        set: Vec<String>,

        /// Check that every image can be pulled
        #[arg(long)]
        verify: bool,
    },

    /// Produce a values overlay pointing at mirrored images
    Values {
        /// Chart values file
        values: PathBuf,

        /// Image mapping (PUBLIC=PRIVATE), repeatable
        #[arg(long = "map", required = true)]
        map: Vec<String>,

        /// Write the overlay here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    logging::init(cli.debug);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: Cli) -> error::Result<()> {
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Mirror {
            appspec,
            latest,
            scan_only,
            push_images,
            skip_scan,
            workers,
            manifests,
            charts,
            output,
            report,
        } => {
            let settings = commands::load_settings(config)?;
            let options = RunOptions {
                latest,
                scan_only,
                push_images,
                skip_scan,
            };
            let overrides = Overrides {
                workers,
                manifests,
                charts,
                output,
            };
            commands::mirror::run(settings, overrides, &appspec, options, report.as_deref()).await
        }

        Commands::List { appspec, manifests } => {
            let mut settings = commands::load_settings(config)?;
            Overrides {
                manifests,
                ..Overrides::default()
            }
            .apply(&mut settings);
            commands::list::run(&settings, &appspec)
        }

        Commands::Images { chart, set, verify } => {
            let settings = commands::load_settings(config)?;
            commands::images::run(&settings, &chart, &set, verify).await
        }

        Commands::Values { values, map, output } => commands::values::run(&values, &map, output.as_deref()),
    }
}
