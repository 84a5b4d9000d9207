//! Per-platform tier builds.

use std::sync::Arc;

use rosforge_core::error::{ForgeError, Result};
use rosforge_core::{Distro, Platform, Tier};

use crate::artifact::{Artifact, LABEL_CREATED, LABEL_VERSION};
use crate::customize::TierSpec;
use crate::engine::ImageEngine;

/// Applies a tier's layer on a parent image and stamps build metadata.
#[derive(Clone)]
pub struct TierBuilder {
    engine: Arc<dyn ImageEngine>,
    created: String,
    version: String,
}

impl TierBuilder {
    /// `created` and `version` are fixed for the whole run.
    pub fn new(engine: Arc<dyn ImageEngine>, created: String, version: String) -> Self {
        Self {
            engine,
            created,
            version,
        }
    }

    /// Build one platform variant of `spec.tier` on top of `parent`.
    ///
    /// Failures are not retried.
    pub async fn build(
        &self,
        parent: &Artifact,
        distro: &Distro,
        platform: &Platform,
        spec: &TierSpec,
    ) -> Result<Artifact> {
        let step = spec.step_for(distro, platform);
        tracing::info!(
            distro = %distro,
            tier = %spec.tier,
            platform = %platform,
            step = %step.name,
            "Building"
        );

        let built = self
            .engine
            .apply(parent, &step)
            .await
            .map_err(|e| build_error(distro, spec.tier, platform, e))?;

        Ok(built
            .with_label(LABEL_CREATED, &self.created)
            .with_label(LABEL_VERSION, &self.version))
    }
}

fn build_error(distro: &Distro, tier: Tier, platform: &Platform, err: ForgeError) -> ForgeError {
    match err {
        already @ ForgeError::BuildStep { .. } => already,
        other => ForgeError::BuildStep {
            distro: distro.to_string(),
            tier: tier.to_string(),
            platform: platform.to_string(),
            message: other.to_string(),
        },
    }
}
