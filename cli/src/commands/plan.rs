//! `rosforge plan` command.
//!
//! Lists the references a run would publish for the requested tiers without
//! contacting any registry. Parent tiers that turn out to be missing are
//! built and published too; those are not listed.

use clap::Args;
use rosforge_core::{ImageIdentity, RunClock, RunConfig};
use rosforge_runtime::publish::LATEST_TAG;
use rosforge_runtime::{ImageReference, PushKind};

use super::ConfigArgs;
use crate::output;

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Only show references (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PlanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.config.load()?;
    let canonical_tag = config.canonical_tag(&RunClock::now());
    let rows = plan_rows(&config, &canonical_tag);

    if args.quiet {
        for row in &rows {
            println!("{}", row.reference);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["IMAGE", "KIND", "REGISTRY", "REFERENCE"]);
    for row in &rows {
        table.add_row(vec![
            row.identity.to_string(),
            row.kind.to_string(),
            row.reference.registry.clone(),
            row.reference.to_string(),
        ]);
    }
    println!("{table}");
    if config.manifest_only {
        println!("manifest-only: platforms without a published image are skipped per registry");
    }
    Ok(())
}

struct PlanRow {
    identity: ImageIdentity,
    kind: PushKind,
    reference: ImageReference,
}

fn plan_rows(config: &RunConfig, canonical_tag: &str) -> Vec<PlanRow> {
    let mut rows = Vec::new();
    let multi_arch = config.platforms.len() >= 2;

    for distro in &config.distros {
        for tier in config.rebuild.requested() {
            let identity = ImageIdentity::new(distro.clone(), tier);
            let image = identity.image_name();

            for registry in &config.registries {
                let reference = |tag: &str| {
                    ImageReference::new(&registry.address, &registry.namespace, &image, tag)
                };
                for platform in &config.platforms {
                    rows.push(PlanRow {
                        identity: identity.clone(),
                        kind: PushKind::Arch,
                        reference: reference(&platform.arch_tag()),
                    });
                }
                if multi_arch {
                    for tag in [canonical_tag, LATEST_TAG] {
                        rows.push(PlanRow {
                            identity: identity.clone(),
                            kind: PushKind::Manifest,
                            reference: reference(tag),
                        });
                    }
                }
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosforge_core::{Distro, Platform, Tier};

    fn config(platforms: Vec<Platform>) -> RunConfig {
        let mut config = RunConfig {
            distros: vec![Distro::from("noetic")],
            platforms,
            ..RunConfig::default()
        };
        config.rebuild.set(Tier::Desktop);
        config
    }

    #[test]
    fn test_plan_counts_per_registry() {
        let rows = plan_rows(
            &config(vec![Platform::linux_amd64(), Platform::linux_arm64()]),
            "20250109",
        );
        // two registries, each with two arch tags and two manifest tags
        assert_eq!(rows.len(), 8);
        let refs: Vec<String> = rows.iter().map(|r| r.reference.to_string()).collect();
        assert!(refs.contains(&"docker.io/sshawn/noetic-desktop:arm64".to_string()));
        assert!(refs.contains(
            &"registry.cn-beijing.aliyuncs.com/sshawn/noetic-desktop:20250109".to_string()
        ));
        assert!(refs.contains(&"docker.io/sshawn/noetic-desktop:latest".to_string()));
    }

    #[test]
    fn test_plan_single_platform_has_no_manifests() {
        let rows = plan_rows(&config(vec![Platform::linux_amd64()]), "20250109");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.kind == PushKind::Arch));
    }

    #[test]
    fn test_plan_without_tiers_is_empty() {
        let config = RunConfig {
            distros: vec![Distro::from("noetic")],
            ..RunConfig::default()
        };
        assert!(plan_rows(&config, "x").is_empty());
    }
}
