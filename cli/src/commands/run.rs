//! `rosforge run` command.

use std::sync::Arc;

use clap::Args;
use rosforge_core::RunClock;
use rosforge_runtime::{DockerEngine, OciRegistry, RegistryTarget, RunCoordinator, TierTable};

use super::ConfigArgs;
use crate::output;

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Docker CLI used to build and push
    #[arg(long, default_value = "docker", env = "ROSFORGE_DOCKER")]
    pub docker: String,

    /// Print the run report as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.config.load()?;
    let clock = RunClock::now();
    let targets: Vec<RegistryTarget> = config
        .registries
        .iter()
        .map(RegistryTarget::from_config)
        .collect();

    tracing::info!(
        canonical_tag = %config.canonical_tag(&clock),
        registries = targets.len(),
        "Run configured"
    );

    let coordinator = RunCoordinator::new(
        config,
        clock,
        targets,
        Arc::new(OciRegistry::new()),
        Arc::new(DockerEngine::with_binary(args.docker)),
        TierTable::default(),
    )?;
    let report = coordinator.run().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if !report.pushes.is_empty() {
            println!("{}", output::report_table(&report));
        }
        println!("{}", output::summary_line(&report));
    }
    Ok(())
}
