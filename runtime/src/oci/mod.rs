//! OCI registry support.
//!
//! - Image reference parsing and push reference construction
//! - Registry credentials (environment, then the on-disk store)
//! - Platform-aware existence checks and manifest list assembly

pub mod credentials;
pub mod reference;
pub mod registry;

pub use credentials::CredentialStore;
pub use reference::ImageReference;
pub use registry::{IndexEntry, ManifestList, OciRegistry, Registry, RegistryAuth, RegistryTarget};
