//! Registry targets and the OCI registry client.
//!
//! Uses the `oci-distribution` crate to check whether a platform-specific
//! image exists and to assemble multi-architecture image indexes from
//! per-architecture tags that were already pushed.

use std::fmt;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::{
    ImageIndexEntry, OciImageIndex, Platform as OciPlatform, IMAGE_MANIFEST_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use rosforge_core::error::{ForgeError, Result};
use rosforge_core::{Platform, RegistryConfig};

use super::credentials::CredentialStore;
use super::reference::ImageReference;
use crate::artifact::Artifact;

/// Authentication credentials for a container registry.
///
/// `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Credentials for a configured registry.
    ///
    /// The secret comes from the registry's `password_env` variable, then
    /// the credential store; without either the registry is used anonymously.
    pub fn for_registry(config: &RegistryConfig) -> Self {
        let from_env = config
            .password_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|secret| !secret.is_empty());
        if let Some(secret) = from_env {
            return Self::basic(config.username(), secret);
        }

        if let Ok(store) = CredentialStore::default_path() {
            if let Ok(Some((username, password))) = store.get(&config.address) {
                return Self::basic(username, password);
            }
        }

        tracing::warn!(
            registry = %config.address,
            "No credentials found, using anonymous access"
        );
        Self::anonymous()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The secret itself, for handing to an engine over stdin.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A registry repository namespace every published tag goes to.
#[derive(Debug, Clone)]
pub struct RegistryTarget {
    pub address: String,
    pub namespace: String,
    pub auth: RegistryAuth,
}

impl RegistryTarget {
    pub fn new(address: &str, namespace: &str, auth: RegistryAuth) -> Self {
        Self {
            address: address.to_string(),
            namespace: namespace.to_string(),
            auth,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(&config.address, &config.namespace, RegistryAuth::for_registry(config))
    }

    /// `{address}/{namespace}/{image}:{tag}`
    pub fn reference(&self, image: &str, tag: &str) -> ImageReference {
        ImageReference::new(&self.address, &self.namespace, image, tag)
    }
}

/// One platform entry of a manifest list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub platform: Platform,
    /// Per-architecture reference in the same repository.
    pub reference: ImageReference,
}

/// A multi-architecture manifest list: a primary variant plus the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestList {
    pub primary: IndexEntry,
    pub others: Vec<IndexEntry>,
}

impl ManifestList {
    /// Build from entries; `None` unless there are at least two.
    pub fn from_entries(mut entries: Vec<IndexEntry>) -> Option<Self> {
        if entries.len() < 2 {
            return None;
        }
        let primary = entries.remove(0);
        Some(Self {
            primary,
            others: entries,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        std::iter::once(&self.primary).chain(self.others.iter())
    }

    pub fn len(&self) -> usize {
        1 + self.others.len()
    }
}

/// Remote registry operations the pipeline depends on.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Look up a platform-specific image.
    ///
    /// `Ok(None)` means the registry definitively reported the image
    /// missing; `Err` is a transient failure worth retrying.
    async fn fetch(
        &self,
        reference: &ImageReference,
        platform: &Platform,
        auth: &RegistryAuth,
    ) -> Result<Option<Artifact>>;

    /// Push a manifest list under `target`, returning the manifest URL.
    async fn push_index(
        &self,
        target: &ImageReference,
        list: &ManifestList,
        auth: &RegistryAuth,
    ) -> Result<String>;
}

/// [`Registry`] backed by the OCI distribution API.
#[derive(Debug, Clone, Copy, Default)]
pub struct OciRegistry;

impl OciRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Client whose index resolution picks `platform`.
    fn client_for(platform: &Platform) -> Client {
        let os = platform.os().to_string();
        let arch = platform.architecture().to_string();
        let variant = platform.variant().map(str::to_string);
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(move |manifests: &[ImageIndexEntry]| {
                select_platform(manifests, &os, &arch, variant.as_deref())
            })),
            ..Default::default()
        };
        Client::new(config)
    }

    fn client() -> Client {
        Client::new(ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Registry for OciRegistry {
    async fn fetch(
        &self,
        reference: &ImageReference,
        platform: &Platform,
        auth: &RegistryAuth,
    ) -> Result<Option<Artifact>> {
        let oci_ref = to_oci_reference(reference)?;
        let client = Self::client_for(platform);

        match client.pull_image_manifest(&oci_ref, &auth.to_oci_auth()).await {
            Ok((_manifest, digest)) => {
                tracing::debug!(
                    reference = %reference,
                    platform = %platform,
                    digest = %digest,
                    "Resolved image"
                );
                Ok(Some(Artifact::remote(
                    reference.pinned(&digest),
                    platform.clone(),
                )))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(ForgeError::TransientFetch {
                reference: reference.to_string(),
                platform: platform.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn push_index(
        &self,
        target: &ImageReference,
        list: &ManifestList,
        auth: &RegistryAuth,
    ) -> Result<String> {
        let target_ref = to_oci_reference(target)?;
        let oci_auth = auth.to_oci_auth();
        let client = Self::client();
        let registry_error = |message: String| ForgeError::Registry {
            registry: target.registry.clone(),
            message,
        };

        client
            .auth(&target_ref, &oci_auth, RegistryOperation::Push)
            .await
            .map_err(|e| registry_error(format!("Failed to authenticate: {}", e)))?;

        let mut manifests = Vec::with_capacity(list.len());
        for entry in list.entries() {
            let entry_ref = to_oci_reference(&entry.reference)?;
            let (raw, digest) = client
                .pull_manifest_raw(
                    &entry_ref,
                    &oci_auth,
                    &[OCI_IMAGE_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE],
                )
                .await
                .map_err(|e| {
                    registry_error(format!(
                        "Failed to read manifest {}: {}",
                        entry.reference, e
                    ))
                })?;

            manifests.push(ImageIndexEntry {
                media_type: manifest_media_type(&raw),
                digest,
                size: raw.len() as i64,
                platform: Some(to_oci_platform(&entry.platform)),
                annotations: None,
            });
        }

        let index = OciImageIndex {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_INDEX_MEDIA_TYPE.to_string()),
            manifests,
            annotations: None,
        };

        let url = client
            .push_manifest_list(&target_ref, &oci_auth, index)
            .await
            .map_err(|e| registry_error(format!("Failed to push manifest list: {}", e)))?;

        tracing::info!(
            reference = %target,
            platforms = list.len(),
            "Manifest list pushed"
        );
        Ok(url)
    }
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str
        .parse::<Reference>()
        .map_err(|e| ForgeError::Reference(format!("'{}': {}", ref_str, e)))
}

fn to_oci_platform(platform: &Platform) -> OciPlatform {
    OciPlatform {
        architecture: platform.architecture().to_string(),
        os: platform.os().to_string(),
        os_version: None,
        os_features: None,
        variant: platform.variant().map(str::to_string),
        features: None,
    }
}

/// Media type declared by a raw manifest, defaulting to the OCI type.
fn manifest_media_type(raw: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v["mediaType"].as_str().map(str::to_string))
        .unwrap_or_else(|| OCI_IMAGE_MEDIA_TYPE.to_string())
}

/// Registry answers that mean "this image does not exist".
fn is_not_found(err: &OciDistributionError) -> bool {
    match err {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code == 404,
        OciDistributionError::RegistryError { envelope, .. } => envelope.errors.iter().any(|e| {
            matches!(
                e.code,
                OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown
            )
        }),
        _ => false,
    }
}

/// Pick the index entry matching `os/arch[/variant]`.
fn select_platform(
    manifests: &[ImageIndexEntry],
    os: &str,
    arch: &str,
    variant: Option<&str>,
) -> Option<String> {
    manifests
        .iter()
        .find(|entry| {
            entry.platform.as_ref().map_or(false, |p| {
                p.os == os
                    && p.architecture == arch
                    && (variant.is_none() || p.variant.as_deref() == variant)
            })
        })
        .map(|entry| entry.digest.clone())
}
