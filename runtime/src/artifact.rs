//! Image artifacts and per-platform variant sets.
//!
//! An [`Artifact`] is an immutable handle to one platform-specific image.
//! Labeling produces a new handle; nothing in the pipeline mutates an
//! artifact it was handed.

use std::collections::BTreeMap;
use std::fmt;

use rosforge_core::Platform;

use crate::oci::ImageReference;

/// OCI annotation key for the image creation timestamp.
pub const LABEL_CREATED: &str = "org.opencontainers.image.created";

/// OCI annotation key for the image version.
pub const LABEL_VERSION: &str = "org.opencontainers.image.version";

/// Where an artifact's content lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// A published image, pinned by digest.
    Remote(ImageReference),
    /// An image held by the build engine under a local name.
    Local(String),
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactSource::Remote(reference) => write!(f, "{}", reference),
            ArtifactSource::Local(name) => f.write_str(name),
        }
    }
}

/// Handle to a platform-specific image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    source: ArtifactSource,
    platform: Platform,
    labels: BTreeMap<String, String>,
}

impl Artifact {
    pub fn remote(reference: ImageReference, platform: Platform) -> Self {
        Self {
            source: ArtifactSource::Remote(reference),
            platform,
            labels: BTreeMap::new(),
        }
    }

    pub fn local(name: impl Into<String>, platform: Platform) -> Self {
        Self {
            source: ArtifactSource::Local(name.into()),
            platform,
            labels: BTreeMap::new(),
        }
    }

    /// A new handle carrying one more label.
    pub fn with_label(&self, key: &str, value: &str) -> Self {
        let mut labels = self.labels.clone();
        labels.insert(key.to_string(), value.to_string());
        Self {
            source: self.source.clone(),
            platform: self.platform.clone(),
            labels,
        }
    }

    pub fn source(&self) -> &ArtifactSource {
        &self.source
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Labels not yet baked into the image content.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

/// One artifact per platform, in configured platform order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantSet {
    variants: Vec<(Platform, Artifact)>,
}

impl VariantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the variant for `platform`.
    pub fn insert(&mut self, platform: Platform, artifact: Artifact) {
        match self.variants.iter_mut().find(|(p, _)| *p == platform) {
            Some(slot) => slot.1 = artifact,
            None => self.variants.push((platform, artifact)),
        }
    }

    pub fn get(&self, platform: &Platform) -> Option<&Artifact> {
        self.variants
            .iter()
            .find(|(p, _)| p == platform)
            .map(|(_, a)| a)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Platform, &Artifact)> {
        self.variants.iter().map(|(p, a)| (p, a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_label_returns_new_handle() {
        let base = Artifact::local("rosforge-build:1", Platform::linux_amd64());
        let labeled = base.with_label(LABEL_VERSION, "20250109");

        assert!(base.labels().is_empty());
        assert_eq!(labeled.labels()[LABEL_VERSION], "20250109");
        assert_eq!(labeled.source(), base.source());
        assert_eq!(labeled.platform(), base.platform());
    }

    #[test]
    fn test_variant_set_keeps_insertion_order() {
        let mut set = VariantSet::new();
        set.insert(Platform::linux_arm64(), Artifact::local("a", Platform::linux_arm64()));
        set.insert(Platform::linux_amd64(), Artifact::local("b", Platform::linux_amd64()));

        let order: Vec<String> = set.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(order, vec!["linux/arm64", "linux/amd64"]);
    }

    #[test]
    fn test_variant_set_insert_replaces() {
        let mut set = VariantSet::new();
        set.insert(Platform::linux_amd64(), Artifact::local("old", Platform::linux_amd64()));
        set.insert(Platform::linux_amd64(), Artifact::local("new", Platform::linux_amd64()));

        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get(&Platform::linux_amd64()).unwrap().source(),
            &ArtifactSource::Local("new".to_string())
        );
    }

    #[test]
    fn test_source_display() {
        let reference = ImageReference::new("docker.io", "sshawn", "noetic", "amd64")
            .pinned("sha256:beef");
        let artifact = Artifact::remote(reference, Platform::linux_amd64());
        assert_eq!(
            artifact.source().to_string(),
            "docker.io/sshawn/noetic@sha256:beef"
        );
    }
}
