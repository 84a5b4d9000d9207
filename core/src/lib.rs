//! rosforge Core - Foundational Types and Abstractions
//!
//! This crate provides the types shared across the rosforge workspace:
//! distros, platforms, the tier chain, image identities, the run
//! configuration and the error type.

pub mod config;
pub mod error;
pub mod platform;
pub mod tier;

// Re-export commonly used types
pub use config::{RegistryConfig, RetryConfig, RunClock, RunConfig, TierFlags};
pub use error::{ForgeError, Result};
pub use platform::{Distro, Platform};
pub use tier::{ImageIdentity, Tier};

/// rosforge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
