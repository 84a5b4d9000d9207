//! In-memory registry and engine for tests.
//!
//! [`MemoryRegistry`] answers existence checks from seeded references and
//! records manifest lists. [`MemoryEngine`] records applied layer steps and
//! pushes; when linked to a registry, pushed images become fetchable. Both
//! can inject failures and report peak push concurrency through a shared
//! [`ConcurrencyGauge`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rosforge_core::error::{ForgeError, Result};
use rosforge_core::Platform;

use crate::artifact::Artifact;
use crate::customize::LayerStep;
use crate::engine::ImageEngine;
use crate::oci::{ImageReference, ManifestList, Registry, RegistryAuth};

/// Tracks how many pushes overlap.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self.clone())
    }

    /// Highest number of pushes seen in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct GaugeGuard(Arc<ConcurrencyGauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RegistryState {
    images: HashMap<(String, Platform), String>,
    fetches: Vec<(String, Platform)>,
    transient_fetches: u32,
    manifests: Vec<(String, ManifestList)>,
    failing_indexes: HashMap<String, u32>,
    next_digest: u64,
}

/// [`Registry`] backed by a map of `reference -> digest` per platform.
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
    gauge: Mutex<Arc<ConcurrencyGauge>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            gauge: Mutex::new(ConcurrencyGauge::new()),
        }
    }

    pub fn set_gauge(&self, gauge: Arc<ConcurrencyGauge>) {
        *self.gauge.lock() = gauge;
    }

    /// Make `reference` resolvable for `platform`.
    pub fn seed(&self, reference: &ImageReference, platform: &Platform) {
        let mut state = self.state.lock();
        state.next_digest += 1;
        let digest = format!("sha256:{:064x}", state.next_digest);
        state
            .images
            .insert((reference.to_string(), platform.clone()), digest);
    }

    pub fn contains(&self, reference: &str, platform: &Platform) -> bool {
        self.state
            .lock()
            .images
            .contains_key(&(reference.to_string(), platform.clone()))
    }

    /// The next `count` fetches fail with a transient error.
    pub fn fail_fetches(&self, count: u32) {
        self.state.lock().transient_fetches = count;
    }

    /// The first `count` manifest pushes to `reference` fail.
    pub fn fail_index_pushes_to(&self, reference: &str, count: u32) {
        self.state
            .lock()
            .failing_indexes
            .insert(reference.to_string(), count);
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches.len()
    }

    /// Fetched references, in order.
    pub fn fetched_references(&self) -> Vec<String> {
        self.state
            .lock()
            .fetches
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    pub fn manifests(&self) -> Vec<(String, ManifestList)> {
        self.state.lock().manifests.clone()
    }

    pub fn manifest_references(&self) -> Vec<String> {
        self.state
            .lock()
            .manifests
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn fetch(
        &self,
        reference: &ImageReference,
        platform: &Platform,
        _auth: &RegistryAuth,
    ) -> Result<Option<Artifact>> {
        let mut state = self.state.lock();
        let key = (reference.to_string(), platform.clone());
        state.fetches.push(key.clone());

        if state.transient_fetches > 0 {
            state.transient_fetches -= 1;
            return Err(ForgeError::TransientFetch {
                reference: reference.to_string(),
                platform: platform.to_string(),
                message: "connection reset by peer".to_string(),
            });
        }

        Ok(state
            .images
            .get(&key)
            .map(|digest| Artifact::remote(reference.pinned(digest), platform.clone())))
    }

    async fn push_index(
        &self,
        target: &ImageReference,
        list: &ManifestList,
        _auth: &RegistryAuth,
    ) -> Result<String> {
        let gauge = self.gauge.lock().clone();
        let _guard = gauge.enter();
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        let key = target.to_string();
        if let Some(remaining) = state.failing_indexes.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ForgeError::Registry {
                    registry: target.registry.clone(),
                    message: "503 Service Unavailable".to_string(),
                });
            }
        }

        state.manifests.retain(|(r, _)| *r != key);
        state.manifests.push((key.clone(), list.clone()));
        for entry in list.entries() {
            state.next_digest += 1;
            let digest = format!("sha256:{:064x}", state.next_digest);
            state.images.insert((key.clone(), entry.platform.clone()), digest);
        }
        Ok(format!(
            "https://{}/v2/{}/manifests/{}",
            target.registry,
            target.repository,
            target.tag.as_deref().unwrap_or("latest")
        ))
    }
}

/// One layer step the engine applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedStep {
    pub parent: String,
    pub platform: Platform,
    pub step: String,
    pub result: String,
}

/// One successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedImage {
    pub reference: String,
    pub platform: Platform,
    pub source: String,
    pub labels: Vec<(String, String)>,
}

#[derive(Default)]
struct EngineState {
    applies: Vec<AppliedStep>,
    pushes: Vec<PushedImage>,
    push_attempts: HashMap<String, u32>,
    failing_pushes: HashMap<String, u32>,
    failing_platforms: HashSet<Platform>,
    push_delay: Duration,
}

/// [`ImageEngine`] that records instead of building.
pub struct MemoryEngine {
    state: Mutex<EngineState>,
    gauge: Mutex<Arc<ConcurrencyGauge>>,
    registry: Option<Arc<MemoryRegistry>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            gauge: Mutex::new(ConcurrencyGauge::new()),
            registry: None,
        }
    }

    /// Engine whose pushes become resolvable in `registry`.
    pub fn linked(registry: Arc<MemoryRegistry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::new()
        }
    }

    pub fn set_gauge(&self, gauge: Arc<ConcurrencyGauge>) {
        *self.gauge.lock() = gauge;
    }

    /// How long each push stays in flight.
    pub fn set_push_delay(&self, delay: Duration) {
        self.state.lock().push_delay = delay;
    }

    /// Every apply for `platform` fails.
    pub fn fail_applies_on(&self, platform: &Platform) {
        self.state.lock().failing_platforms.insert(platform.clone());
    }

    /// The first `count` pushes to `reference` fail.
    pub fn fail_pushes_to(&self, reference: &str, count: u32) {
        self.state
            .lock()
            .failing_pushes
            .insert(reference.to_string(), count);
    }

    pub fn applies(&self) -> Vec<AppliedStep> {
        self.state.lock().applies.clone()
    }

    pub fn pushes(&self) -> Vec<PushedImage> {
        self.state.lock().pushes.clone()
    }

    pub fn pushed_references(&self) -> Vec<String> {
        self.state
            .lock()
            .pushes
            .iter()
            .map(|p| p.reference.clone())
            .collect()
    }

    pub fn was_pushed(&self, reference: &str) -> bool {
        self.state
            .lock()
            .pushes
            .iter()
            .any(|p| p.reference == reference)
    }

    pub fn push_attempts(&self, reference: &str) -> u32 {
        self.state
            .lock()
            .push_attempts
            .get(reference)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageEngine for MemoryEngine {
    async fn apply(&self, parent: &Artifact, step: &LayerStep) -> Result<Artifact> {
        let mut state = self.state.lock();
        if state.failing_platforms.contains(parent.platform()) {
            return Err(ForgeError::Engine(format!(
                "step '{}' exited with status 100",
                step.name
            )));
        }

        let result = format!("memory-build-{}", state.applies.len() + 1);
        state.applies.push(AppliedStep {
            parent: parent.source().to_string(),
            platform: parent.platform().clone(),
            step: step.name.clone(),
            result: result.clone(),
        });
        Ok(Artifact::local(result, parent.platform().clone()))
    }

    async fn push(
        &self,
        artifact: &Artifact,
        target: &ImageReference,
        _auth: &RegistryAuth,
    ) -> Result<String> {
        let gauge = self.gauge.lock().clone();
        let _guard = gauge.enter();

        let key = target.to_string();
        let delay = {
            let mut state = self.state.lock();
            *state.push_attempts.entry(key.clone()).or_insert(0) += 1;
            state.push_delay
        };
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.state.lock();
            if let Some(remaining) = state.failing_pushes.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ForgeError::TransientPublish {
                        registry: target.registry.clone(),
                        reference: key,
                        message: "502 Bad Gateway".to_string(),
                    });
                }
            }
            state.pushes.push(PushedImage {
                reference: key.clone(),
                platform: artifact.platform().clone(),
                source: artifact.source().to_string(),
                labels: artifact
                    .labels()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            });
        }

        if let Some(registry) = &self.registry {
            registry.seed(target, artifact.platform());
        }
        Ok(format!("sha256:{:064x}", key.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_linked_engine_pushes_become_fetchable() {
        let registry = Arc::new(MemoryRegistry::new());
        let engine = MemoryEngine::linked(registry.clone());
        let target = ImageReference::new("docker.io", "sshawn", "noetic", "amd64");

        engine
            .push(
                &Artifact::local("memory-build-1", Platform::linux_amd64()),
                &target,
                &RegistryAuth::anonymous(),
            )
            .await
            .unwrap();

        let found = registry
            .fetch(&target, &Platform::linux_amd64(), &RegistryAuth::anonymous())
            .await
            .unwrap();
        assert!(found.is_some());
        assert!(registry
            .fetch(&target, &Platform::linux_arm64(), &RegistryAuth::anonymous())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_gauge_tracks_peak() {
        let gauge = ConcurrencyGauge::new();
        {
            let _a = gauge.enter();
            let _b = gauge.enter();
        }
        let _c = gauge.enter();
        assert_eq!(gauge.peak(), 2);
        assert_eq!(gauge.current.load(Ordering::SeqCst), 1);
    }
}
