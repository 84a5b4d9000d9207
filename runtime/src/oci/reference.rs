//! OCI image reference parsing and construction.
//!
//! Parses references like `docker.io/library/ros:noetic` into structured
//! components and builds the push references a run publishes to
//! (`{registry}/{namespace}/{image}:{tag}`).

use rosforge_core::error::{ForgeError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname (e.g., "docker.io", "registry.cn-beijing.aliyuncs.com")
    pub registry: String,
    /// Repository path (e.g., "library/ros", "sshawn/noetic-desktop")
    pub repository: String,
    /// Tag (e.g., "latest", "amd64", "20250109")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Reference to `{registry}/{namespace}/{image}:{tag}`.
    pub fn new(registry: &str, namespace: &str, image: &str, tag: &str) -> Self {
        Self {
            registry: registry.to_string(),
            repository: format!("{}/{}", namespace, image),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `ros` → docker.io/library/ros:latest
    /// - `ros:noetic` → docker.io/library/ros:noetic
    /// - `sshawn/noetic` → docker.io/sshawn/noetic:latest
    /// - `registry.example.com:5000/team/image:tag`
    /// - `docker.io/library/ros@sha256:abc...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ForgeError::Reference("empty image reference".to_string()));
        }

        let (name_tag, digest) = split_digest(reference)?;
        let (name, tag) = split_tag(name_tag);
        let (registry, repository) = split_registry(name)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Same repository pinned to a content digest.
    pub fn pinned(&self, digest: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split `name[:tag]@algo:hex` into the name part and the digest.
fn split_digest(reference: &str) -> Result<(&str, Option<String>)> {
    match reference.rsplit_once('@') {
        Some((name, digest)) => {
            if !digest.contains(':') {
                return Err(ForgeError::Reference(format!(
                    "invalid digest in '{}': expected algorithm:hex",
                    reference
                )));
            }
            Ok((name, Some(digest.to_string())))
        }
        None => Ok((reference, None)),
    }
}

/// Split a trailing `:tag` off the last path component.
///
/// A bare `host:port` (no slash, numeric suffix) is not a tag.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_start = name_tag.rfind('/').map_or(0, |pos| pos + 1);
    let last = &name_tag[last_start..];
    match last.rfind(':') {
        Some(colon) => {
            let tag = &last[colon + 1..];
            if last_start == 0 && tag.chars().all(|c| c.is_ascii_digit()) {
                return (name_tag, None);
            }
            (&name_tag[..last_start + colon], Some(tag))
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository components.
fn split_registry(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(ForgeError::Reference(format!(
                    "empty repository in '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
        return Ok((DEFAULT_REGISTRY.to_string(), name.to_string()));
    }
    Ok((DEFAULT_REGISTRY.to_string(), format!("library/{}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_official_image_with_tag() {
        let r = ImageReference::parse("ros:noetic").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/ros");
        assert_eq!(r.tag.as_deref(), Some("noetic"));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_defaults_to_latest() {
        let r = ImageReference::parse("sshawn/humble-desktop").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "sshawn/humble-desktop");
        assert_eq!(r.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("registry.cn-beijing.aliyuncs.com/sshawn/jazzy-box:arm64")
            .unwrap();
        assert_eq!(r.registry, "registry.cn-beijing.aliyuncs.com");
        assert_eq!(r.repository, "sshawn/jazzy-box");
        assert_eq!(r.tag.as_deref(), Some("arm64"));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/ci/noetic:amd64").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "ci/noetic");
        assert_eq!(r.tag.as_deref(), Some("amd64"));
    }

    #[test]
    fn test_parse_digest_without_tag() {
        let r = ImageReference::parse("docker.io/library/ros@sha256:0123abcd").unwrap();
        assert_eq!(r.repository, "library/ros");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some("sha256:0123abcd"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("ros@nodigest").is_err());
        assert!(ImageReference::parse("ghcr.io/").is_err());
    }

    #[test]
    fn test_new_builds_push_reference() {
        let r = ImageReference::new("docker.io", "sshawn", "noetic-desktop", "amd64");
        assert_eq!(r.to_string(), "docker.io/sshawn/noetic-desktop:amd64");
    }

    #[test]
    fn test_pinned_drops_tag() {
        let r = ImageReference::new("docker.io", "sshawn", "jazzy", "arm64");
        assert_eq!(
            r.pinned("sha256:feed").to_string(),
            "docker.io/sshawn/jazzy@sha256:feed"
        );
    }

    #[test]
    fn test_parse_round_trips_display() {
        let text = "registry.cn-beijing.aliyuncs.com/sshawn/humble:20250109";
        assert_eq!(ImageReference::parse(text).unwrap().to_string(), text);
    }
}
