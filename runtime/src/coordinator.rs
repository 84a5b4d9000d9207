//! Run coordination.
//!
//! A run either builds the requested tiers (publishing as it goes) or, in
//! manifest-only mode, re-publishes what each registry already holds. Both
//! workflows race the publish scope: the first push that fails for good
//! stops the workflow and cancels the remaining pushes.

use std::sync::Arc;

use futures::future::try_join_all;
use rosforge_core::error::{ForgeError, Result};
use rosforge_core::{Distro, ImageIdentity, RunClock, RunConfig, Tier};

use crate::artifact::VariantSet;
use crate::builder::TierBuilder;
use crate::customize::TierTable;
use crate::engine::ImageEngine;
use crate::oci::{Registry, RegistryTarget};
use crate::orchestrator::BuildOrchestrator;
use crate::publish::{PublishGate, PublishPipeline, PublishScope, RetryPolicy, RunReport};
use crate::resolve::{ArtifactResolver, ResolveMode};

pub struct RunCoordinator {
    config: Arc<RunConfig>,
    orchestrator: BuildOrchestrator,
    pipeline: PublishPipeline,
    resolver: ArtifactResolver,
}

impl RunCoordinator {
    /// Wire a run. `targets` receive every push; the first is primary.
    pub fn new(
        config: RunConfig,
        clock: RunClock,
        targets: Vec<RegistryTarget>,
        registry: Arc<dyn Registry>,
        engine: Arc<dyn ImageEngine>,
        tiers: TierTable,
    ) -> Result<Self> {
        config.validate()?;
        if targets.is_empty() {
            return Err(ForgeError::Config("No registry targets".to_string()));
        }

        let config = Arc::new(config);
        let canonical_tag = config.canonical_tag(&clock);
        let resolver = ArtifactResolver::new(registry.clone(), &config.resolve_retry);
        let pipeline = PublishPipeline::new(
            engine.clone(),
            registry,
            targets,
            PublishGate::new(config.publish_concurrency),
            RetryPolicy::from(&config.publish_retry),
            Arc::new(PublishScope::new()),
            canonical_tag.clone(),
        );
        let builder = TierBuilder::new(engine, clock.created(), canonical_tag);
        let orchestrator = BuildOrchestrator::new(
            config.clone(),
            Arc::new(tiers),
            resolver.clone(),
            builder,
            pipeline.clone(),
        );

        Ok(Self {
            config,
            orchestrator,
            pipeline,
            resolver,
        })
    }

    /// Run to completion. Succeeds only if every scheduled push succeeded.
    pub async fn run(&self) -> Result<RunReport> {
        let scope = self.pipeline.scope().clone();
        let tiers = self.config.rebuild.requested();
        if tiers.is_empty() {
            tracing::warn!("No tiers requested, nothing to do");
        }
        tracing::info!(
            distros = ?self.config.distros,
            platforms = ?self.config.platforms,
            tiers = ?tiers,
            manifest_only = self.config.manifest_only,
            "Starting run"
        );

        let workflow = async {
            if self.config.manifest_only {
                self.manifest_workflow(&tiers).await
            } else {
                self.build_workflow(&tiers).await
            }
        };

        tokio::select! {
            result = workflow => {
                if let Err(e) = result {
                    scope.abort();
                    return Err(e);
                }
            }
            _ = scope.failed() => {
                return Err(match scope.join().await {
                    Err(e) => e,
                    Ok(_) => ForgeError::Cancelled("publish scope failed".to_string()),
                });
            }
        }

        let pushes = scope.join().await?;
        let report = RunReport {
            builds: self.orchestrator.build_count(),
            pushes,
        };
        tracing::info!(
            builds = report.builds,
            arch_pushes = report.arch_pushes(),
            manifest_pushes = report.manifest_pushes(),
            "Run complete"
        );
        Ok(report)
    }

    async fn build_workflow(&self, tiers: &[Tier]) -> Result<()> {
        try_join_all(self.config.distros.iter().map(|distro| async move {
            for tier in tiers {
                self.orchestrator.ensure_and_build(distro, *tier).await?;
            }
            Ok::<_, ForgeError>(())
        }))
        .await?;
        Ok(())
    }

    async fn manifest_workflow(&self, tiers: &[Tier]) -> Result<()> {
        try_join_all(self.config.distros.iter().map(|distro| async move {
            for tier in tiers {
                self.republish(distro, *tier).await?;
            }
            Ok::<_, ForgeError>(())
        }))
        .await?;
        Ok(())
    }

    /// Re-publish one identity from each registry's own per-arch tags.
    async fn republish(&self, distro: &Distro, tier: Tier) -> Result<()> {
        let identity = ImageIdentity::new(distro.clone(), tier);
        let image = identity.image_name();

        for target in self.pipeline.targets() {
            let mut variants = VariantSet::new();
            for platform in &self.config.platforms {
                let reference = target.reference(&image, &platform.arch_tag());
                let found = self
                    .resolver
                    .resolve(&reference, platform, &target.auth, ResolveMode::Fallback)
                    .await?;
                match found {
                    Some(artifact) => variants.insert(platform.clone(), artifact),
                    None => tracing::warn!(
                        image = %identity,
                        registry = %target.address,
                        platform = %platform,
                        "No published variant, excluding platform"
                    ),
                }
            }

            if variants.is_empty() {
                tracing::warn!(
                    image = %identity,
                    registry = %target.address,
                    "Nothing published, skipping"
                );
                continue;
            }
            self.pipeline.publish_to_target(&identity, target, &variants);
        }
        Ok(())
    }
}
