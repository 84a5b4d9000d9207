//! Recursive tier builds.
//!
//! [`BuildOrchestrator::ensure_and_build`] builds one `(distro, tier)` for
//! every configured platform. Parents come from, in order: a build of the
//! parent tier earlier in this run, the primary registry, or a recursive
//! build of the parent tier. The base tier's upstream image must exist.
//!
//! Builds are memoized per run, so concurrent requests for the same
//! identity join one build.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use rosforge_core::error::{ForgeError, Result};
use rosforge_core::{Distro, ImageIdentity, Platform, RunConfig, Tier};
use tokio::sync::OnceCell;

use crate::artifact::{Artifact, VariantSet};
use crate::builder::TierBuilder;
use crate::customize::TierTable;
use crate::oci::{ImageReference, RegistryAuth, RegistryTarget};
use crate::publish::PublishPipeline;
use crate::resolve::{ArtifactResolver, ResolveMode};

pub struct BuildOrchestrator {
    config: Arc<RunConfig>,
    tiers: Arc<TierTable>,
    resolver: ArtifactResolver,
    builder: TierBuilder,
    pipeline: PublishPipeline,
    memo: DashMap<ImageIdentity, Arc<OnceCell<VariantSet>>>,
    builds: AtomicUsize,
}

impl BuildOrchestrator {
    pub fn new(
        config: Arc<RunConfig>,
        tiers: Arc<TierTable>,
        resolver: ArtifactResolver,
        builder: TierBuilder,
        pipeline: PublishPipeline,
    ) -> Self {
        Self {
            config,
            tiers,
            resolver,
            builder,
            pipeline,
            memo: DashMap::new(),
            builds: AtomicUsize::new(0),
        }
    }

    /// Number of `(distro, tier)` builds completed in this run.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Build `(distro, tier)` for every platform and schedule its pushes.
    ///
    /// Runs at most once per identity per run; later and concurrent callers
    /// get the same variant set.
    pub fn ensure_and_build<'a>(
        &'a self,
        distro: &'a Distro,
        tier: Tier,
    ) -> BoxFuture<'a, Result<VariantSet>> {
        async move {
            let identity = ImageIdentity::new(distro.clone(), tier);
            let cell = self.memo.entry(identity.clone()).or_default().clone();
            let variants = cell
                .get_or_try_init(|| self.build_tier(&identity))
                .await?;
            Ok(variants.clone())
        }
        .boxed()
    }

    async fn build_tier(&self, identity: &ImageIdentity) -> Result<VariantSet> {
        let spec = self.tiers.get(identity.tier).ok_or_else(|| {
            ForgeError::Config(format!("No tier spec registered for {}", identity.tier))
        })?;
        tracing::info!(image = %identity, "Ensuring parent images");

        // Every parent must be in hand before the first build starts.
        let parents = try_join_all(
            self.config
                .platforms
                .iter()
                .map(|platform| self.parent_for(identity, platform)),
        )
        .await?;

        let built = try_join_all(
            self.config
                .platforms
                .iter()
                .zip(parents.iter())
                .map(|(platform, parent)| self.builder.build(parent, &identity.distro, platform, spec)),
        )
        .await?;

        let mut variants = VariantSet::new();
        for (platform, artifact) in self.config.platforms.iter().zip(built) {
            variants.insert(platform.clone(), artifact);
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        tracing::info!(image = %identity, platforms = variants.len(), "Built, scheduling pushes");
        self.pipeline.publish_variant_set(identity, &variants);
        Ok(variants)
    }

    async fn parent_for(&self, identity: &ImageIdentity, platform: &Platform) -> Result<Artifact> {
        match identity.parent() {
            None => self.upstream_for(&identity.distro, platform).await,
            Some(parent) => {
                if !self.memo.contains_key(&parent) {
                    let target = self.primary_target()?;
                    let reference = target.reference(&parent.image_name(), &platform.arch_tag());
                    let found = self
                        .resolver
                        .resolve(&reference, platform, &target.auth, ResolveMode::Fallback)
                        .await?;
                    if let Some(artifact) = found {
                        return Ok(artifact);
                    }
                    tracing::info!(
                        image = %parent,
                        platform = %platform,
                        "Parent image absent, building it first"
                    );
                }

                let variants = self.ensure_and_build(&parent.distro, parent.tier).await?;
                variants.get(platform).cloned().ok_or_else(|| {
                    ForgeError::Other(format!("{} has no {} variant", parent, platform))
                })
            }
        }
    }

    async fn upstream_for(&self, distro: &Distro, platform: &Platform) -> Result<Artifact> {
        let reference = ImageReference::parse(&self.config.upstream_for(distro))?;
        let found = self
            .resolver
            .resolve(&reference, platform, &RegistryAuth::anonymous(), ResolveMode::Strict)
            .await?;
        found.ok_or_else(|| ForgeError::ExpectedArtifactAbsent {
            reference: reference.to_string(),
            platform: platform.to_string(),
            attempts: self.config.resolve_retry.attempts,
        })
    }

    fn primary_target(&self) -> Result<&RegistryTarget> {
        self.pipeline
            .targets()
            .first()
            .ok_or_else(|| ForgeError::Config("No registries configured".to_string()))
    }
}
