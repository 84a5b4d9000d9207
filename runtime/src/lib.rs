//! rosforge Runtime - tiered image builds and multi-registry publishing.
//!
//! This crate resolves, builds and publishes the image tier chain:
//! registry lookups with retries, recursive parent builds memoized per run,
//! and a bounded, fail-fast push pipeline that assembles multi-architecture
//! manifest lists.

#![allow(clippy::result_large_err)]

pub mod artifact;
pub mod builder;
pub mod coordinator;
pub mod customize;
pub mod engine;
pub mod fakes;
pub mod oci;
pub mod orchestrator;
pub mod publish;
pub mod resolve;

// Re-export common types
pub use artifact::{Artifact, ArtifactSource, VariantSet, LABEL_CREATED, LABEL_VERSION};
pub use builder::TierBuilder;
pub use coordinator::RunCoordinator;
pub use customize::{apt_install, LayerCustomizer, LayerStep, TierSpec, TierTable};
pub use engine::{DockerEngine, ImageEngine};
pub use oci::{CredentialStore, ImageReference, OciRegistry, Registry, RegistryAuth, RegistryTarget};
pub use oci::{IndexEntry, ManifestList};
pub use orchestrator::BuildOrchestrator;
pub use publish::{PublishGate, PublishPipeline, PublishScope, PushKind, PushRecord, RetryPolicy, RunReport};
pub use resolve::{ArtifactResolver, ResolveMode};

/// rosforge Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
