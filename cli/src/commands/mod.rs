//! CLI command definitions and dispatch.

mod login;
mod plan;
mod run;
mod version;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rosforge_core::{Distro, Platform, Result, RunConfig, Tier};

/// rosforge - tiered ROS image builds published to multiple registries.
#[derive(Parser)]
#[command(name = "rosforge", version, about)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "ROSFORGE_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build the requested tiers and publish them
    Run(run::RunArgs),
    /// Show the references a run would publish
    Plan(plan::PlanArgs),
    /// Save registry credentials for later runs
    Login(login::LoginArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI command.
pub async fn dispatch(cli: Cli) -> std::result::Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::Plan(args) => plan::execute(args).await,
        Command::Login(args) => login::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

/// Run configuration flags shared by `run` and `plan`.
///
/// Precedence, lowest first: built-in defaults, `--config` file,
/// environment, these flags.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// YAML run configuration
    #[arg(long, env = "ROSFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Distros to build (comma separated or repeated)
    #[arg(long = "distro", value_delimiter = ',')]
    pub distros: Vec<String>,

    /// Target platforms, e.g. linux/amd64,linux/arm64
    #[arg(long = "platform", value_delimiter = ',')]
    pub platforms: Vec<String>,

    /// Tiers to rebuild: base, desktop, box
    #[arg(long = "tier", value_delimiter = ',')]
    pub tiers: Vec<Tier>,

    /// Re-publish existing per-arch images instead of building
    #[arg(long)]
    pub manifest_only: bool,

    /// Canonical manifest tag (defaults to the build date)
    #[arg(long)]
    pub tag: Option<String>,

    /// Maximum pushes in flight
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl ConfigArgs {
    /// Resolve the run configuration from every layer.
    pub fn load(&self) -> Result<RunConfig> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    fn load_with_env(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };
        config.apply_env(lookup)?;

        if !self.distros.is_empty() {
            config.distros = self.distros.iter().map(|d| Distro::new(d.trim())).collect();
        }
        if !self.platforms.is_empty() {
            config.platforms = self
                .platforms
                .iter()
                .map(|p| Platform::parse(p))
                .collect::<Result<Vec<_>>>()?;
        }
        for tier in &self.tiers {
            config.rebuild.set(*tier);
        }
        if self.manifest_only {
            config.manifest_only = true;
        }
        if let Some(tag) = &self.tag {
            config.manifest_tag = Some(tag.clone());
        }
        if let Some(limit) = self.concurrency {
            config.publish_concurrency = limit;
        }

        config.validate()?;
        Ok(config)
    }
}
