//! Artifact resolution with fixed-delay retries.

use std::sync::Arc;
use std::time::Duration;

use rosforge_core::error::{ForgeError, Result};
use rosforge_core::{Platform, RetryConfig};

use crate::artifact::Artifact;
use crate::oci::{ImageReference, Registry, RegistryAuth};

/// What to do when an image is still missing after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// The image is supplied from outside; absence is fatal.
    Strict,
    /// The image is ours; absence means it has to be built.
    Fallback,
}

/// Looks up published images, retrying transient registry errors.
#[derive(Clone)]
pub struct ArtifactResolver {
    registry: Arc<dyn Registry>,
    attempts: u32,
    delay: Duration,
}

impl ArtifactResolver {
    pub fn new(registry: Arc<dyn Registry>, retry: &RetryConfig) -> Self {
        Self {
            registry,
            attempts: retry.attempts.max(1),
            delay: retry.initial_delay(),
        }
    }

    /// Resolve `reference` for `platform`.
    ///
    /// A definitive not-found ends the attempts early and a non-transient
    /// error is returned at once. In
    /// [`ResolveMode::Fallback`] absence is `Ok(None)`; in
    /// [`ResolveMode::Strict`] it is [`ForgeError::ExpectedArtifactAbsent`].
    pub async fn resolve(
        &self,
        reference: &ImageReference,
        platform: &Platform,
        auth: &RegistryAuth,
        mode: ResolveMode,
    ) -> Result<Option<Artifact>> {
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.attempts {
            attempt += 1;
            tracing::info!(
                reference = %reference,
                platform = %platform,
                attempt,
                max_attempts = self.attempts,
                "Resolving image"
            );

            match self.registry.fetch(reference, platform, auth).await {
                Ok(Some(artifact)) => return Ok(Some(artifact)),
                Ok(None) => {
                    tracing::info!(reference = %reference, platform = %platform, "Image not found");
                    last_error = None;
                    break;
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        reference = %reference,
                        platform = %platform,
                        attempt,
                        error = %e,
                        "Fetch failed"
                    );
                    last_error = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        match mode {
            ResolveMode::Fallback => {
                if let Some(e) = last_error {
                    tracing::warn!(
                        reference = %reference,
                        platform = %platform,
                        error = %e,
                        "Treating unreachable image as absent"
                    );
                }
                Ok(None)
            }
            ResolveMode::Strict => Err(ForgeError::ExpectedArtifactAbsent {
                reference: reference.to_string(),
                platform: platform.to_string(),
                attempts: attempt,
            }),
        }
    }
}
