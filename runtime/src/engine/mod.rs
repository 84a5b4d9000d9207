//! Image build engines.
//!
//! The engine is the opaque capability that turns a parent image plus a
//! [`LayerStep`] into a new image, and pushes images to registries.

mod docker;

pub use docker::{render_dockerfile, DockerEngine};

use async_trait::async_trait;
use rosforge_core::error::Result;

use crate::artifact::Artifact;
use crate::customize::LayerStep;
use crate::oci::{ImageReference, RegistryAuth};

#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Apply `step` on top of `parent`, returning a handle to the new image.
    ///
    /// Pending labels on `parent` are baked into the result.
    async fn apply(&self, parent: &Artifact, step: &LayerStep) -> Result<Artifact>;

    /// Push `artifact` (with its pending labels) as `target`, returning the
    /// pushed manifest digest.
    async fn push(
        &self,
        artifact: &Artifact,
        target: &ImageReference,
        auth: &RegistryAuth,
    ) -> Result<String>;
}
