//! Persistent credential store for container registries.
//!
//! Fallback source of registry secrets when the configured environment
//! variable is unset. Stored at `~/.rosforge/auth/credentials.json` and
//! written atomically (write tmp, rename).

use std::collections::BTreeMap;
use std::path::PathBuf;

use rosforge_core::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
struct CredentialEntry {
    username: String,
    password: String,
}

#[derive(Default, Serialize, Deserialize)]
struct CredentialFile {
    registries: BTreeMap<String, CredentialEntry>,
}

/// Per-registry username/password pairs on disk.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at `~/.rosforge/auth/credentials.json`.
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            ForgeError::Config("Cannot determine home directory for credential store".to_string())
        })?;
        Ok(Self::new(home.join(".rosforge").join("auth").join("credentials.json")))
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store credentials for a registry, replacing any existing entry.
    pub fn store(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut file = self.load()?;
        file.registries.insert(
            normalize_registry(registry),
            CredentialEntry {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
        self.save(&file)
    }

    /// Credentials for a registry as `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        Ok(self
            .load()?
            .registries
            .remove(&normalize_registry(registry))
            .map(|e| (e.username, e.password)))
    }

    fn load(&self) -> Result<CredentialFile> {
        if !self.path.exists() {
            return Ok(CredentialFile::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&data).map_err(|e| {
            ForgeError::Config(format!(
                "Failed to parse credential store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, file: &CredentialFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(file)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Docker Hub answers to several hostnames; they share one entry.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    match r.as_str() {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => "index.docker.io".to_string(),
        _ => r,
    }
}
