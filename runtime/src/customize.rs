//! Layer customizers and the tier table.
//!
//! A customizer is a pure function of `(distro, platform)` returning the
//! [`LayerStep`] the engine applies on top of the parent image. The default
//! table installs one apt package set per tier.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rosforge_core::{Distro, Platform, Tier};

/// Where the apt install report is appended inside the image.
pub const APT_REPORT_PATH: &str = "/var/log/rosforge/apt-install.log";

/// Mount point of the shared apt archive cache.
pub const APT_CACHE_DIR: &str = "/var/cache/apt/archives";

/// One layer to apply: a bash script run as root on the parent image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerStep {
    /// Short description, used in logs.
    pub name: String,
    pub script: String,
    /// Engine cache volume mounted at [`APT_CACHE_DIR`] while the step runs.
    pub cache_id: Option<String>,
}

/// Produces the layer step for one `(distro, platform)` build.
pub type LayerCustomizer = Arc<dyn Fn(&Distro, &Platform) -> LayerStep + Send + Sync>;

/// A tier's customizer. Parent and image suffix come from the [`Tier`].
#[derive(Clone)]
pub struct TierSpec {
    pub tier: Tier,
    pub customizer: LayerCustomizer,
}

impl TierSpec {
    pub fn new(
        tier: Tier,
        customizer: impl Fn(&Distro, &Platform) -> LayerStep + Send + Sync + 'static,
    ) -> Self {
        Self {
            tier,
            customizer: Arc::new(customizer),
        }
    }

    pub fn step_for(&self, distro: &Distro, platform: &Platform) -> LayerStep {
        (self.customizer)(distro, platform)
    }
}

impl fmt::Debug for TierSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierSpec")
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}

/// Static table of tier specs, one per [`Tier`].
#[derive(Debug, Clone)]
pub struct TierTable {
    specs: Vec<TierSpec>,
}

impl TierTable {
    /// Table from explicit specs; later entries replace earlier ones.
    pub fn new(specs: impl IntoIterator<Item = TierSpec>) -> Self {
        let mut table = Self { specs: Vec::new() };
        for spec in specs {
            table.insert(spec);
        }
        table
    }

    pub fn insert(&mut self, spec: TierSpec) {
        self.specs.retain(|s| s.tier != spec.tier);
        self.specs.push(spec);
        self.specs.sort_by_key(|s| s.tier);
    }

    pub fn get(&self, tier: Tier) -> Option<&TierSpec> {
        self.specs.iter().find(|s| s.tier == tier)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new([
            TierSpec::new(Tier::Base, |distro, platform| {
                apt_install("install base", &base_packages(distro), apt_cache_id(distro, platform))
            }),
            TierSpec::new(Tier::Desktop, |distro, platform| {
                apt_install(
                    "install desktop",
                    &desktop_packages(distro),
                    apt_cache_id(distro, platform),
                )
            }),
            TierSpec::new(Tier::Box, |distro, platform| {
                apt_install("install box", &box_packages(), apt_cache_id(distro, platform))
            }),
        ])
    }
}

/// Apt archive cache shared by builds of the same distro and architecture.
pub fn apt_cache_id(distro: &Distro, platform: &Platform) -> String {
    format!("apt-archives-{}-{}", distro, platform.arch_tag())
}

/// Step installing `packages` with apt.
///
/// Duplicates are dropped keeping first occurrence. Packages without an
/// install candidate are skipped and listed in [`APT_REPORT_PATH`].
pub fn apt_install(name: &str, packages: &[String], cache_id: String) -> LayerStep {
    let mut seen = HashSet::new();
    let quoted: Vec<String> = packages
        .iter()
        .filter(|p| seen.insert(p.as_str()))
        .map(|p| shell_quote(p))
        .collect();

    let script = APT_INSTALL_TEMPLATE
        .replace("@PACKAGES@", &quoted.join(" "))
        .replace("@REPORT@", &shell_quote(APT_REPORT_PATH))
        .replace("@CACHE@", APT_CACHE_DIR);

    LayerStep {
        name: name.to_string(),
        script,
        cache_id: Some(cache_id),
    }
}

const APT_INSTALL_TEMPLATE: &str = r#"#!/usr/bin/env bash
set -euo pipefail
export DEBIAN_FRONTEND=noninteractive

trap 'rc=$?; tail -n 200 /var/log/apt/term.log || true; tail -n 200 /var/log/dpkg.log || true; df -h || true; exit $rc' ERR
apt-get update -o Acquire::Retries=3

install -d -m 0755 @CACHE@/partial
chmod -R u+rwX,go+rX @CACHE@

pkgs=(@PACKAGES@)
to_install=()
skipped=()

for p in "${pkgs[@]}"; do
  pol="$(apt-cache policy "$p" 2>/dev/null || true)"
  cand="$(awk -F': ' '/Candidate:/ {print $2; exit}' <<<"$pol" || true)"
  if [[ -n "$cand" && "$cand" != "(none)" ]]; then
    to_install+=("$p")
  else
    skipped+=("$p")
  fi
done

ts="$(date -u +'%Y-%m-%dT%H:%M:%SZ')"
mkdir -p "$(dirname @REPORT@)"
{
  echo "----- $ts -----"
  echo "requested: ${pkgs[*]:-}"
  echo "installed: ${to_install[*]:-}"
  echo "skipped_not_in_repo: ${skipped[*]:-}"
  echo
} >> @REPORT@

if (( ${#to_install[@]} )); then
  apt-get install -y --no-install-recommends "${to_install[@]}"
fi

rm -rf /var/lib/apt/lists/*
"#;

/// Single-quote for bash unless the word is plainly safe.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.+:/=@%,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn words(list: &str) -> Vec<String> {
    list.split_whitespace().map(str::to_string).collect()
}

pub fn base_packages(distro: &Distro) -> Vec<String> {
    let mut pkgs = words("build-essential cmake make gcc g++ gdb");
    pkgs.extend(words(
        "libyaml-cpp-dev libeigen3-dev libgeographic-dev libzmq3-dev \
         libsdl2-dev libboost-all-dev libprotobuf-dev",
    ));
    pkgs.extend(words("python-catkin-tools python3-catkin-tools ros-dev-tools"));
    pkgs.push(format!("ros-{}-ackermann-msgs", distro));
    pkgs.push(format!("ros-{}-grid-map-msgs", distro));
    pkgs
}

pub fn desktop_packages(distro: &Distro) -> Vec<String> {
    let mut pkgs = words(
        "bash-completion rsync wget curl git git-lfs htop tmux vim \
         python3-pip openssh-server",
    );
    pkgs.push(format!("ros-{}-desktop-full", distro));
    pkgs.push(format!("ros-{}-plotjuggler-ros", distro));
    pkgs
}

pub fn box_packages() -> Vec<String> {
    words(
        "systemd systemd-sysv libpam-systemd \
         dbus dbus-user-session \
         sudo ca-certificates less nano vim curl wget git git-lfs openssh-client \
         locales tzdata bash-completion \
         xdg-utils xdg-user-dirs shared-mime-info desktop-file-utils \
         fontconfig fonts-noto-core fonts-noto-cjk fonts-noto-color-emoji \
         adwaita-icon-theme hicolor-icon-theme \
         libgl1-mesa-dri libglx-mesa0 libegl1 libgbm1 libdrm2 mesa-utils \
         libvulkan1 mesa-vulkan-drivers vulkan-tools \
         libpulse0 pulseaudio-utils pipewire-alsa pipewire-jack \
         pipewire-audio-client-libraries alsa-utils \
         libxkbcommon0 libxrandr2 libxss1 libxtst6 libnss3 libcups2 libasound2 \
         libx11-6 libxext6 libxi6 libxrender1 libxcursor1 libxcomposite1 \
         libxdamage1 libxfixes3 \
         libwayland-client0 libwayland-cursor0 libwayland-egl1 \
         libgtk-3-0 \
         wl-clipboard xclip xauth \
         unzip",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apt_install_dedupes_preserving_order() {
        let pkgs = words("git curl git vim curl");
        let step = apt_install("tools", &pkgs, "c".to_string());
        assert!(step.script.contains("pkgs=(git curl vim)"));
    }

    #[test]
    fn test_apt_install_script_shape() {
        let step = apt_install("tools", &words("htop"), "apt-archives-noetic-amd64".to_string());
        assert_eq!(step.cache_id.as_deref(), Some("apt-archives-noetic-amd64"));
        assert!(step.script.starts_with("#!/usr/bin/env bash\n"));
        assert!(step.script.contains("apt-get update -o Acquire::Retries=3"));
        assert!(step.script.contains("--no-install-recommends"));
        assert!(step.script.contains(">> /var/log/rosforge/apt-install.log"));
        assert!(step.script.contains("install -d -m 0755 /var/cache/apt/archives/partial"));
        assert!(step.script.contains(r#"for p in "${pkgs[@]}"; do"#));
        for placeholder in ["@PACKAGES@", "@REPORT@", "@CACHE@"] {
            assert!(!step.script.contains(placeholder), "{placeholder} left in script");
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("ros-noetic-desktop-full"), "ros-noetic-desktop-full");
        assert_eq!(shell_quote("g++"), "g++");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_cache_id_per_distro_and_arch() {
        let distro = Distro::from("humble");
        assert_eq!(
            apt_cache_id(&distro, &Platform::linux_arm64()),
            "apt-archives-humble-arm64"
        );
    }

    #[test]
    fn test_package_sets_are_distro_specific() {
        let jazzy = Distro::from("jazzy");
        assert!(base_packages(&jazzy).contains(&"ros-jazzy-ackermann-msgs".to_string()));
        assert!(desktop_packages(&jazzy).contains(&"ros-jazzy-desktop-full".to_string()));
        assert!(box_packages().contains(&"systemd".to_string()));
    }

    #[test]
    fn test_default_table_covers_every_tier() {
        let table = TierTable::default();
        for tier in Tier::ALL {
            let spec = table.get(tier).unwrap();
            assert_eq!(spec.tier, tier);
        }
        let step = table
            .get(Tier::Desktop)
            .unwrap()
            .step_for(&Distro::from("noetic"), &Platform::linux_amd64());
        assert!(step.script.contains("ros-noetic-desktop-full"));
        assert_eq!(step.cache_id.as_deref(), Some("apt-archives-noetic-amd64"));
    }

    #[test]
    fn test_insert_replaces_spec() {
        let mut table = TierTable::default();
        table.insert(TierSpec::new(Tier::Box, |_, _| LayerStep {
            name: "noop".to_string(),
            script: "true".to_string(),
            cache_id: None,
        }));
        let step = table
            .get(Tier::Box)
            .unwrap()
            .step_for(&Distro::from("noetic"), &Platform::linux_amd64());
        assert_eq!(step.script, "true");
    }
}
