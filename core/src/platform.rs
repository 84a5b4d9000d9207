//! Distro and platform identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// OS/release variant an image family is built for (e.g. `noetic`, `jazzy`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distro(String);

impl Distro {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Distro {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Target platform in `os/arch[/variant]` form, e.g. `linux/amd64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    os: String,
    architecture: String,
    variant: Option<String>,
}

impl Platform {
    /// Parse a platform string.
    ///
    /// Accepts `os/arch` and `os/arch/variant`; every component must be non-empty.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ForgeError::Config(format!("Invalid platform '{}'", s)));
        }
        match parts.as_slice() {
            [os, arch] => Ok(Self {
                os: os.to_string(),
                architecture: arch.to_string(),
                variant: None,
            }),
            [os, arch, variant] => Ok(Self {
                os: os.to_string(),
                architecture: arch.to_string(),
                variant: Some(variant.to_string()),
            }),
            _ => Err(ForgeError::Config(format!(
                "Invalid platform '{}': expected os/arch[/variant]",
                s
            ))),
        }
    }

    pub fn linux_amd64() -> Self {
        Self {
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
            variant: None,
        }
    }

    pub fn linux_arm64() -> Self {
        Self {
            os: "linux".to_string(),
            architecture: "arm64".to_string(),
            variant: None,
        }
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// Tag used for the per-architecture push (`amd64`, `arm64`, `arm-v7`).
    pub fn arch_tag(&self) -> String {
        match &self.variant {
            Some(v) => format!("{}-{}", self.architecture, v),
            None => self.architecture.clone(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref v) = self.variant {
            write!(f, "/{}", v)?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Platform {
    type Error = ForgeError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Platform> for String {
    fn from(p: Platform) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_arch() {
        let p = Platform::parse("linux/amd64").unwrap();
        assert_eq!(p.os(), "linux");
        assert_eq!(p.architecture(), "amd64");
        assert_eq!(p.variant(), None);
        assert_eq!(p.arch_tag(), "amd64");
        assert_eq!(p, Platform::linux_amd64());
    }

    #[test]
    fn test_parse_with_variant() {
        let p = Platform::parse("linux/arm/v7").unwrap();
        assert_eq!(p.variant(), Some("v7"));
        assert_eq!(p.arch_tag(), "arm-v7");
        assert_eq!(p.to_string(), "linux/arm/v7");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let p: Platform = " linux/arm64 ".parse().unwrap();
        assert_eq!(p, Platform::linux_arm64());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Platform::parse("amd64").is_err());
        assert!(Platform::parse("linux/").is_err());
        assert!(Platform::parse("linux/arm/v7/extra").is_err());
        assert!(Platform::parse("").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Platform::linux_arm64()).unwrap();
        assert_eq!(json, "\"linux/arm64\"");
        let back: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Platform::linux_arm64());
        assert!(serde_json::from_str::<Platform>("\"bogus\"").is_err());
    }

    #[test]
    fn test_distro_display() {
        let d = Distro::from("humble");
        assert_eq!(d.to_string(), "humble");
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"humble\"");
    }
}
