//! The image tier chain.
//!
//! Tiers form a fixed dependency chain `Base -> Desktop -> Box`. Each tier
//! is built on top of its parent's published image for the same distro;
//! `Base` sits on an upstream image this system never writes to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};
use crate::platform::Distro;

/// An image tier, ordered from the bottom of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Base,
    Desktop,
    Box,
}

/// Where a tier's parent image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    /// An upstream image supplied outside this system.
    Upstream,
    /// An image this system builds and publishes itself.
    Tier(Tier),
}

impl Tier {
    /// All tiers in build order.
    pub const ALL: [Tier; 3] = [Tier::Base, Tier::Desktop, Tier::Box];

    pub fn parent(self) -> Parent {
        match self {
            Tier::Base => Parent::Upstream,
            Tier::Desktop => Parent::Tier(Tier::Base),
            Tier::Box => Parent::Tier(Tier::Desktop),
        }
    }

    /// Suffix appended to the distro to form the image name.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Tier::Base => None,
            Tier::Desktop => Some("desktop"),
            Tier::Box => Some("box"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Base => "base",
            Tier::Desktop => "desktop",
            Tier::Box => "box",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(Tier::Base),
            "desktop" => Ok(Tier::Desktop),
            "box" => Ok(Tier::Box),
            other => Err(ForgeError::Config(format!(
                "Unknown tier '{}': expected base, desktop or box",
                other
            ))),
        }
    }
}

/// A logical image: one distro at one tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIdentity {
    pub distro: Distro,
    pub tier: Tier,
}

impl ImageIdentity {
    pub fn new(distro: Distro, tier: Tier) -> Self {
        Self { distro, tier }
    }

    /// Repository name inside a namespace: `noetic`, `noetic-desktop`, `noetic-box`.
    pub fn image_name(&self) -> String {
        match self.tier.suffix() {
            Some(suffix) => format!("{}-{}", self.distro, suffix),
            None => self.distro.to_string(),
        }
    }

    /// Identity of the in-system parent, if the parent is not upstream.
    pub fn parent(&self) -> Option<ImageIdentity> {
        match self.tier.parent() {
            Parent::Tier(tier) => Some(ImageIdentity::new(self.distro.clone(), tier)),
            Parent::Upstream => None,
        }
    }
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.distro, self.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_chain() {
        assert_eq!(Tier::Base.parent(), Parent::Upstream);
        assert_eq!(Tier::Desktop.parent(), Parent::Tier(Tier::Base));
        assert_eq!(Tier::Box.parent(), Parent::Tier(Tier::Desktop));
    }

    #[test]
    fn test_tier_order() {
        assert!(Tier::Base < Tier::Desktop);
        assert!(Tier::Desktop < Tier::Box);
        assert_eq!(Tier::ALL.to_vec(), vec![Tier::Base, Tier::Desktop, Tier::Box]);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("base".parse::<Tier>().unwrap(), Tier::Base);
        assert_eq!(" Desktop ".parse::<Tier>().unwrap(), Tier::Desktop);
        assert_eq!("BOX".parse::<Tier>().unwrap(), Tier::Box);
        assert!("full".parse::<Tier>().is_err());
    }

    #[test]
    fn test_image_names() {
        let d = Distro::from("noetic");
        assert_eq!(ImageIdentity::new(d.clone(), Tier::Base).image_name(), "noetic");
        assert_eq!(
            ImageIdentity::new(d.clone(), Tier::Desktop).image_name(),
            "noetic-desktop"
        );
        assert_eq!(ImageIdentity::new(d, Tier::Box).image_name(), "noetic-box");
    }

    #[test]
    fn test_identity_parent() {
        let box_id = ImageIdentity::new(Distro::from("jazzy"), Tier::Box);
        let desktop = box_id.parent().unwrap();
        assert_eq!(desktop.tier, Tier::Desktop);
        let base = desktop.parent().unwrap();
        assert_eq!(base.tier, Tier::Base);
        assert!(base.parent().is_none());
    }

    #[test]
    fn test_tier_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Tier::Desktop).unwrap(), "\"desktop\"");
        let t: Tier = serde_json::from_str("\"box\"").unwrap();
        assert_eq!(t, Tier::Box);
    }
}
