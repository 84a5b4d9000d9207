use thiserror::Error;

/// rosforge error types
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Registry hiccup while checking whether an image exists
    #[error("Transient fetch error for {reference} ({platform}): {message}")]
    TransientFetch {
        reference: String,
        platform: String,
        message: String,
    },

    /// An externally supplied image is missing after all attempts
    #[error("Expected image not found: {reference} ({platform}) after {attempts} attempts")]
    ExpectedArtifactAbsent {
        reference: String,
        platform: String,
        attempts: u32,
    },

    /// Applying a tier's layer step failed
    #[error("Build step failed for {distro}/{tier} ({platform}): {message}")]
    BuildStep {
        distro: String,
        tier: String,
        platform: String,
        message: String,
    },

    /// A single push attempt failed
    #[error("Transient publish error: {registry} {reference} - {message}")]
    TransientPublish {
        registry: String,
        reference: String,
        message: String,
    },

    /// A push failed on every attempt
    #[error("Publish failed: {registry} {reference} after {attempts} attempts - {message}")]
    FatalPublish {
        registry: String,
        reference: String,
        attempts: u32,
        message: String,
    },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// Malformed image reference
    #[error("Invalid reference: {0}")]
    Reference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Image engine error (process spawn, missing tooling)
    #[error("Engine error: {0}")]
    Engine(String),

    /// The task was cancelled because a sibling failed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ForgeError {
    /// Whether a retry loop may try the failed operation again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ForgeError::TransientFetch { .. }
                | ForgeError::TransientPublish { .. }
                | ForgeError::Registry { .. }
        )
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        ForgeError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ForgeError {
    fn from(err: serde_yaml::Error) -> Self {
        ForgeError::Serialization(err.to_string())
    }
}

/// Result type alias for rosforge operations
pub type Result<T> = std::result::Result<T, ForgeError>;
