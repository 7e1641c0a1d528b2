//! Stowaway Tools
//!
//! Async interfaces to the external programs a mirror run drives, with CLI
//! adapters and in-memory doubles:
//!
//! - **PackageManager** (`helm`): chart metadata, pull, render, push, registry login
//! - **ContainerEngine** (`docker`): manifest inspection, pull, tag, push, login
//! - **RegistryApi** (`aws`): private registry URL, repository and image lookups
//! - **Scanner** (`trivy`): severity-gated vulnerability scans
//! - **RegistrySession**: memoized per-chart authentication
//!
//! ## Example
//!
//! ```rust,no_run
//! use stowaway_tools::{AuthSettings, RegistrySession, ToolBinaries, Toolbox};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tools = Toolbox::cli(&ToolBinaries::default(), None);
//! let session = RegistrySession::new(tools, AuthSettings::default());
//!
//! // Resolved once, then cached for the session
//! let registry = session.private_registry().await?;
//! println!("mirroring into {}", registry);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Notes
//!
//! - Passwords are handed to tools over stdin and never appear in command
//!   lines, logs or reports

pub mod command;
pub mod engine;
pub mod error;
pub mod helm;
pub mod mock;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod toolbox;

pub use command::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
pub use engine::{ContainerEngine, DockerCli};
pub use error::{Diagnosis, Result, ToolError};
pub use helm::{ChartMetadata, HelmCli, PackageManager};
pub use registry::{AwsCli, CreateOutcome, Lookup, RegistryApi, Scope};
pub use scanner::{ScanVerdict, Scanner, TrivyCli};
pub use session::{AuthSettings, AuthTarget, Client, RegistrySession};
pub use toolbox::{ToolBinaries, Toolbox};
