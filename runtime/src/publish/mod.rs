//! Concurrent multi-registry publishing.
//!
//! For every registry target, each platform variant is pushed under its
//! architecture tag. With two or more variants, a manifest list is pushed
//! under the canonical tag and under `latest`; each manifest task waits for
//! that registry's architecture pushes before it takes a gate permit.
//!
//! Every push attempt holds one [`PublishGate`] permit, failed attempts are
//! retried by [`RetryPolicy`], and all tasks live in the run's
//! [`PublishScope`].

mod gate;
mod retry;
mod scope;

pub use gate::PublishGate;
pub use retry::RetryPolicy;
pub use scope::{PublishScope, PushKind, PushRecord, RunReport};

use std::sync::Arc;

use rosforge_core::error::{ForgeError, Result};
use rosforge_core::ImageIdentity;
use tokio::sync::watch;

use crate::artifact::{Artifact, VariantSet};
use crate::engine::ImageEngine;
use crate::oci::{ImageReference, IndexEntry, ManifestList, Registry, RegistryTarget};

/// Tag every manifest list is also pushed under.
pub const LATEST_TAG: &str = "latest";

/// Schedules pushes into a [`PublishScope`].
#[derive(Clone)]
pub struct PublishPipeline {
    engine: Arc<dyn ImageEngine>,
    registry: Arc<dyn Registry>,
    targets: Arc<Vec<RegistryTarget>>,
    gate: PublishGate,
    retry: RetryPolicy,
    scope: Arc<PublishScope>,
    canonical_tag: String,
}

impl PublishPipeline {
    pub fn new(
        engine: Arc<dyn ImageEngine>,
        registry: Arc<dyn Registry>,
        targets: Vec<RegistryTarget>,
        gate: PublishGate,
        retry: RetryPolicy,
        scope: Arc<PublishScope>,
        canonical_tag: String,
    ) -> Self {
        Self {
            engine,
            registry,
            targets: Arc::new(targets),
            gate,
            retry,
            scope,
            canonical_tag,
        }
    }

    pub fn targets(&self) -> &[RegistryTarget] {
        &self.targets
    }

    pub fn scope(&self) -> &Arc<PublishScope> {
        &self.scope
    }

    /// Tags manifest lists are pushed under.
    pub fn manifest_tags(&self) -> [&str; 2] {
        [self.canonical_tag.as_str(), LATEST_TAG]
    }

    /// Schedule every push for `variants` to every registry target.
    ///
    /// Returns once the tasks are spawned; their outcome is reported by the
    /// scope.
    pub fn publish_variant_set(&self, identity: &ImageIdentity, variants: &VariantSet) {
        for target in self.targets.iter() {
            self.publish_to_target(identity, target, variants);
        }
    }

    /// Schedule the pushes of `variants` to a single registry target.
    pub fn publish_to_target(
        &self,
        identity: &ImageIdentity,
        target: &RegistryTarget,
        variants: &VariantSet,
    ) {
        let image = identity.image_name();
        let (done_tx, done_rx) = watch::channel(0usize);
        let done_tx = Arc::new(done_tx);

        let mut entries = Vec::with_capacity(variants.len());
        for (platform, artifact) in variants.iter() {
            let reference = target.reference(&image, &platform.arch_tag());
            entries.push(IndexEntry {
                platform: platform.clone(),
                reference: reference.clone(),
            });
            self.spawn_arch_push(target, artifact.clone(), reference, done_tx.clone());
        }

        let Some(list) = ManifestList::from_entries(entries) else {
            tracing::debug!(
                image = %identity,
                registry = %target.address,
                "Single variant, skipping manifest lists"
            );
            return;
        };
        for tag in self.manifest_tags() {
            self.spawn_manifest_push(target, list.clone(), target.reference(&image, tag), done_rx.clone());
        }
    }

    fn spawn_arch_push(
        &self,
        target: &RegistryTarget,
        artifact: Artifact,
        reference: ImageReference,
        done: Arc<watch::Sender<usize>>,
    ) {
        let push = ArchPush {
            engine: self.engine.clone(),
            gate: self.gate.clone(),
            target: target.clone(),
            artifact,
            reference,
        };
        let retry = self.retry;

        self.scope.spawn(async move {
            let what = push.reference.to_string();
            let push = &push;
            let digest = retry
                .run(&what, |attempt| push.attempt(attempt))
                .await
                .map_err(|(e, attempts)| fatal(&push.target, &what, attempts, e))?;

            done.send_modify(|n| *n += 1);
            tracing::info!(reference = %what, digest = %digest, "Pushed");
            Ok(PushRecord {
                kind: PushKind::Arch,
                registry: push.target.address.clone(),
                reference: what,
            })
        });
    }

    fn spawn_manifest_push(
        &self,
        target: &RegistryTarget,
        list: ManifestList,
        reference: ImageReference,
        mut arch_done: watch::Receiver<usize>,
    ) {
        let expected = list.len();
        let push = ManifestPush {
            registry: self.registry.clone(),
            gate: self.gate.clone(),
            target: target.clone(),
            list,
            reference,
        };
        let retry = self.retry;

        self.scope.spawn(async move {
            let what = push.reference.to_string();
            arch_done
                .wait_for(|done| *done >= expected)
                .await
                .map_err(|_| {
                    ForgeError::Cancelled(format!("architecture pushes for {} did not finish", what))
                })?;

            let push = &push;
            retry
                .run(&what, |attempt| push.attempt(attempt))
                .await
                .map_err(|(e, attempts)| fatal(&push.target, &what, attempts, e))?;

            Ok(PushRecord {
                kind: PushKind::Manifest,
                registry: push.target.address.clone(),
                reference: what,
            })
        });
    }
}

/// One platform image pushed under its architecture tag.
struct ArchPush {
    engine: Arc<dyn ImageEngine>,
    gate: PublishGate,
    target: RegistryTarget,
    artifact: Artifact,
    reference: ImageReference,
}

impl ArchPush {
    async fn attempt(&self, attempt: u32) -> Result<String> {
        let _permit = self.gate.acquire().await?;
        tracing::debug!(reference = %self.reference, attempt, "Pushing image");
        self.engine
            .push(&self.artifact, &self.reference, &self.target.auth)
            .await
            .map_err(|e| transient(&self.target, &self.reference, e))
    }
}

/// A manifest list pushed under a canonical tag.
struct ManifestPush {
    registry: Arc<dyn Registry>,
    gate: PublishGate,
    target: RegistryTarget,
    list: ManifestList,
    reference: ImageReference,
}

impl ManifestPush {
    async fn attempt(&self, attempt: u32) -> Result<String> {
        let _permit = self.gate.acquire().await?;
        tracing::debug!(
            reference = %self.reference,
            platforms = self.list.len(),
            attempt,
            "Pushing manifest list"
        );
        self.registry
            .push_index(&self.reference, &self.list, &self.target.auth)
            .await
            .map_err(|e| transient(&self.target, &self.reference, e))
    }
}

/// Attach the push target to a retryable failure. Other errors pass through
/// unchanged so the retry loop stops on them.
fn transient(target: &RegistryTarget, reference: &ImageReference, err: ForgeError) -> ForgeError {
    match err {
        ForgeError::TransientPublish { .. } => err,
        other if other.is_transient() => ForgeError::TransientPublish {
            registry: target.address.clone(),
            reference: reference.to_string(),
            message: other.to_string(),
        },
        other => other,
    }
}

fn fatal(target: &RegistryTarget, reference: &str, attempts: u32, err: ForgeError) -> ForgeError {
    let message = match err {
        ForgeError::TransientPublish { message, .. } => message,
        other => other.to_string(),
    };
    ForgeError::FatalPublish {
        registry: target.address.clone(),
        reference: reference.to_string(),
        attempts,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DockerEngine;
    use crate::fakes::{MemoryEngine, MemoryRegistry};
    use crate::oci::RegistryAuth;
    use rosforge_core::{Distro, Platform, Tier};
    use std::time::Duration;

    fn targets() -> Vec<RegistryTarget> {
        vec![
            RegistryTarget::new("docker.io", "sshawn", RegistryAuth::anonymous()),
            RegistryTarget::new("registry.cn-beijing.aliyuncs.com", "sshawn", RegistryAuth::anonymous()),
        ]
    }

    fn pipeline(engine: Arc<MemoryEngine>, registry: Arc<MemoryRegistry>, limit: usize) -> PublishPipeline {
        PublishPipeline::new(
            engine,
            registry,
            targets(),
            PublishGate::new(limit),
            RetryPolicy::default(),
            Arc::new(PublishScope::new()),
            "20250109".to_string(),
        )
    }

    fn variants(platforms: &[Platform]) -> VariantSet {
        let mut set = VariantSet::new();
        for platform in platforms {
            set.insert(
                platform.clone(),
                Artifact::local(format!("built-{}", platform.arch_tag()), platform.clone()),
            );
        }
        set
    }

    fn identity() -> ImageIdentity {
        ImageIdentity::new(Distro::from("noetic"), Tier::Desktop)
    }

    #[tokio::test]
    async fn test_two_platforms_push_arch_and_manifests() {
        let engine = Arc::new(MemoryEngine::new());
        let registry = Arc::new(MemoryRegistry::new());
        let pipeline = pipeline(engine.clone(), registry.clone(), 6);

        pipeline.publish_variant_set(
            &identity(),
            &variants(&[Platform::linux_amd64(), Platform::linux_arm64()]),
        );
        let records = pipeline.scope().join().await.unwrap();

        assert_eq!(records.len(), 8);
        let mut pushed = engine.pushed_references();
        pushed.sort();
        assert_eq!(
            pushed,
            vec![
                "docker.io/sshawn/noetic-desktop:amd64",
                "docker.io/sshawn/noetic-desktop:arm64",
                "registry.cn-beijing.aliyuncs.com/sshawn/noetic-desktop:amd64",
                "registry.cn-beijing.aliyuncs.com/sshawn/noetic-desktop:arm64",
            ]
        );
        let mut manifests = registry.manifest_references();
        manifests.sort();
        assert_eq!(
            manifests,
            vec![
                "docker.io/sshawn/noetic-desktop:20250109",
                "docker.io/sshawn/noetic-desktop:latest",
                "registry.cn-beijing.aliyuncs.com/sshawn/noetic-desktop:20250109",
                "registry.cn-beijing.aliyuncs.com/sshawn/noetic-desktop:latest",
            ]
        );
    }

    #[tokio::test]
    async fn test_manifest_follows_its_arch_pushes() {
        let engine = Arc::new(MemoryEngine::new());
        engine.set_push_delay(Duration::from_millis(20));
        let registry = Arc::new(MemoryRegistry::new());
        let pipeline = pipeline(engine.clone(), registry.clone(), 6);

        pipeline.publish_variant_set(
            &identity(),
            &variants(&[Platform::linux_amd64(), Platform::linux_arm64()]),
        );
        pipeline.scope().join().await.unwrap();

        for (reference, list) in registry.manifests() {
            for entry in list.entries() {
                assert!(
                    engine.was_pushed(&entry.reference.to_string()),
                    "{} references unpushed {}",
                    reference,
                    entry.reference
                );
            }
        }
    }

    #[tokio::test]
    async fn test_single_platform_has_no_manifest() {
        let engine = Arc::new(MemoryEngine::new());
        let registry = Arc::new(MemoryRegistry::new());
        let pipeline = pipeline(engine.clone(), registry.clone(), 6);

        pipeline.publish_variant_set(&identity(), &variants(&[Platform::linux_arm64()]));
        let records = pipeline.scope().join().await.unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == PushKind::Arch));
        assert!(registry.manifests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manifest_push_recovers_from_registry_errors() {
        let engine = Arc::new(MemoryEngine::new());
        let registry = Arc::new(MemoryRegistry::new());
        registry.fail_index_pushes_to("docker.io/sshawn/noetic-desktop:latest", 2);
        let pipeline = pipeline(engine, registry.clone(), 6);

        let started = tokio::time::Instant::now();
        pipeline.publish_variant_set(
            &identity(),
            &variants(&[Platform::linux_amd64(), Platform::linux_arm64()]),
        );
        pipeline.scope().join().await.unwrap();

        assert!(registry
            .manifest_references()
            .contains(&"docker.io/sshawn/noetic-desktop:latest".to_string()));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_push_is_fatal() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail_pushes_to("docker.io/sshawn/noetic-desktop:arm64", u32::MAX);
        let registry = Arc::new(MemoryRegistry::new());
        let pipeline = pipeline(engine.clone(), registry.clone(), 6);

        pipeline.publish_variant_set(
            &identity(),
            &variants(&[Platform::linux_amd64(), Platform::linux_arm64()]),
        );
        let err = pipeline.scope().join().await.unwrap_err();

        match err {
            ForgeError::FatalPublish { registry: r, reference, attempts, .. } => {
                assert_eq!(r, "docker.io");
                assert_eq!(reference, "docker.io/sshawn/noetic-desktop:arm64");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.push_attempts("docker.io/sshawn/noetic-desktop:arm64"), 3);
        assert!(registry
            .manifest_references()
            .iter()
            .all(|r| !r.starts_with("docker.io/")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_push_failure_is_not_retried() {
        let registry = Arc::new(MemoryRegistry::new());
        let pipeline = PublishPipeline::new(
            Arc::new(DockerEngine::with_binary("/nonexistent/rosforge-docker")),
            registry.clone(),
            targets(),
            PublishGate::new(6),
            RetryPolicy::default(),
            Arc::new(PublishScope::new()),
            "20250109".to_string(),
        );
        let start = tokio::time::Instant::now();

        pipeline.publish_variant_set(&identity(), &variants(&[Platform::linux_amd64()]));
        let err = pipeline.scope().join().await.unwrap_err();

        match err {
            ForgeError::FatalPublish { attempts, message, .. } => {
                assert_eq!(attempts, 1);
                assert!(message.contains("Failed to run /nonexistent/rosforge-docker"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
