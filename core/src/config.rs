//! Run configuration.
//!
//! A run is configured once, before any work starts, from three layers:
//! built-in defaults, an optional YAML file, then environment variables.
//! The CLI applies its own flags on top.

use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ForgeError, Result};
use crate::platform::{Distro, Platform};
use crate::tier::Tier;

/// UTC offset used for build dates (Asia/Shanghai, no DST).
const BUILD_TZ_OFFSET_SECS: i32 = 8 * 3600;

/// Run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Distros to build, in order
    pub distros: Vec<Distro>,

    /// Target platforms; one image variant per platform
    pub platforms: Vec<Platform>,

    /// Which tiers this run rebuilds (or re-tags in manifest-only mode)
    pub rebuild: TierFlags,

    /// Skip building and re-assemble manifests from published per-arch tags
    pub manifest_only: bool,

    /// Canonical tag override; defaults to the run's build date
    pub manifest_tag: Option<String>,

    /// Maximum number of pushes in flight across the whole run
    pub publish_concurrency: usize,

    /// Registries that receive every published tag; the first is primary
    pub registries: Vec<RegistryConfig>,

    /// Upstream base image template, `{distro}` is substituted
    pub upstream_base: String,

    /// Existence-check retry policy (fixed delay)
    pub resolve_retry: RetryConfig,

    /// Push retry policy (exponential backoff)
    pub publish_retry: RetryConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            distros: vec![
                Distro::from("noetic"),
                Distro::from("humble"),
                Distro::from("jazzy"),
            ],
            platforms: vec![Platform::linux_amd64(), Platform::linux_arm64()],
            rebuild: TierFlags::default(),
            manifest_only: false,
            manifest_tag: None,
            publish_concurrency: 6,
            registries: vec![
                RegistryConfig {
                    address: "docker.io".to_string(),
                    namespace: "sshawn".to_string(),
                    username: Some("sshawn".to_string()),
                    password_env: Some("DOCKERHUB_PASSWORD".to_string()),
                },
                RegistryConfig {
                    address: "registry.cn-beijing.aliyuncs.com".to_string(),
                    namespace: "sshawn".to_string(),
                    username: Some("sshawn".to_string()),
                    password_env: Some("ALIYUN_PASSWORD".to_string()),
                },
            ],
            upstream_base: "docker.io/library/ros:{distro}".to_string(),
            resolve_retry: RetryConfig {
                attempts: 3,
                initial_delay_ms: 2000,
                multiplier: 1,
            },
            publish_retry: RetryConfig {
                attempts: 3,
                initial_delay_ms: 1000,
                multiplier: 2,
            },
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ForgeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay environment variables read through `lookup`.
    ///
    /// Recognised: `TARGET_DISTROS`, `TARGET_PLATFORMS` (comma separated),
    /// `MANIFEST_ONLY`, `REBUILD_BASE`, `REBUILD_DESKTOP`, `REBUILD_BOX`
    /// (enabled by `1`), `MANIFEST_TAG`, `PUBLISH_CONCURRENCY`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(list) = non_empty(lookup("TARGET_DISTROS")) {
            self.distros = split_list(&list).map(Distro::from).collect();
        }
        if let Some(list) = non_empty(lookup("TARGET_PLATFORMS")) {
            self.platforms = split_list(&list)
                .map(Platform::parse)
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(tag) = non_empty(lookup("MANIFEST_TAG")) {
            self.manifest_tag = Some(tag);
        }
        if let Some(limit) = non_empty(lookup("PUBLISH_CONCURRENCY")) {
            self.publish_concurrency = limit.parse().map_err(|_| {
                ForgeError::Config(format!("PUBLISH_CONCURRENCY must be a number, got '{}'", limit))
            })?;
        }

        let enabled = |key: &str| lookup(key).as_deref() == Some("1");
        if enabled("MANIFEST_ONLY") {
            self.manifest_only = true;
        }
        if enabled("REBUILD_BASE") {
            self.rebuild.base = true;
        }
        if enabled("REBUILD_DESKTOP") {
            self.rebuild.desktop = true;
        }
        if enabled("REBUILD_BOX") {
            self.rebuild.r#box = true;
        }
        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.distros.is_empty() {
            return Err(ForgeError::Config("No distros configured".to_string()));
        }
        if self.platforms.is_empty() {
            return Err(ForgeError::Config("No platforms configured".to_string()));
        }
        for (i, platform) in self.platforms.iter().enumerate() {
            if self.platforms[..i].contains(platform) {
                return Err(ForgeError::Config(format!(
                    "Platform {} is listed more than once",
                    platform
                )));
            }
        }
        if self.registries.is_empty() {
            return Err(ForgeError::Config("No registries configured".to_string()));
        }
        if self.publish_concurrency == 0 {
            return Err(ForgeError::Config(
                "publish_concurrency must be at least 1".to_string(),
            ));
        }
        if self.resolve_retry.attempts == 0 || self.publish_retry.attempts == 0 {
            return Err(ForgeError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if !self.upstream_base.contains("{distro}") {
            return Err(ForgeError::Config(format!(
                "upstream_base '{}' must contain {{distro}}",
                self.upstream_base
            )));
        }
        for registry in &self.registries {
            if registry.address.is_empty() || registry.namespace.is_empty() {
                return Err(ForgeError::Config(
                    "registry address and namespace must be set".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Upstream image for a distro's base tier.
    pub fn upstream_for(&self, distro: &Distro) -> String {
        self.upstream_base.replace("{distro}", distro.as_str())
    }

    /// Tag used for manifest lists besides `latest`.
    pub fn canonical_tag(&self, clock: &RunClock) -> String {
        self.manifest_tag
            .clone()
            .unwrap_or_else(|| clock.build_date())
    }
}

/// Per-tier rebuild switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierFlags {
    pub base: bool,
    pub desktop: bool,
    pub r#box: bool,
}

impl TierFlags {
    pub fn contains(&self, tier: Tier) -> bool {
        match tier {
            Tier::Base => self.base,
            Tier::Desktop => self.desktop,
            Tier::Box => self.r#box,
        }
    }

    pub fn set(&mut self, tier: Tier) {
        match tier {
            Tier::Base => self.base = true,
            Tier::Desktop => self.desktop = true,
            Tier::Box => self.r#box = true,
        }
    }

    /// Requested tiers in build order.
    pub fn requested(&self) -> Vec<Tier> {
        Tier::ALL
            .into_iter()
            .filter(|tier| self.contains(*tier))
            .collect()
    }
}

/// A registry every tag is published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host, e.g. `docker.io`
    pub address: String,
    /// Namespace (user or organisation) images live under
    pub namespace: String,
    /// Login name; defaults to the namespace
    #[serde(default)]
    pub username: Option<String>,
    /// Environment variable holding the password or token
    #[serde(default)]
    pub password_env: Option<String>,
}

impl RegistryConfig {
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.namespace)
    }
}

/// Retry envelope: `attempts` tries, delays growing by `multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: u32,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Wall clock captured once at run start.
///
/// Every image built in a run carries the same creation timestamp and
/// version, so the clock is read exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunClock {
    started: DateTime<FixedOffset>,
}

impl RunClock {
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(instant: DateTime<Utc>) -> Self {
        let offset = FixedOffset::east_opt(BUILD_TZ_OFFSET_SECS).unwrap_or(Utc.fix());
        Self {
            started: instant.with_timezone(&offset),
        }
    }

    /// `YYYYMMDD` in the build timezone.
    pub fn build_date(&self) -> String {
        self.started.format("%Y%m%d").to_string()
    }

    /// RFC 3339 creation timestamp with second precision.
    pub fn created(&self) -> String {
        self.started.to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}
