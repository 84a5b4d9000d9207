//! Integration test: drive the `rosforge` binary for commands that never
//! touch a registry.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const CONFIG_ENV: &[&str] = &[
    "ROSFORGE_CONFIG",
    "TARGET_DISTROS",
    "TARGET_PLATFORMS",
    "MANIFEST_ONLY",
    "MANIFEST_TAG",
    "PUBLISH_CONCURRENCY",
    "REBUILD_BASE",
    "REBUILD_DESKTOP",
    "REBUILD_BOX",
];

fn rosforge(args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rosforge"));
    for key in CONFIG_ENV {
        cmd.env_remove(key);
    }
    cmd.args(args).output().expect("failed to run rosforge")
}

#[test]
fn test_version() {
    let out = rosforge(&["version"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("rosforge version "));
}

#[test]
fn test_plan_quiet_lists_references() {
    let out = rosforge(&[
        "plan", "--quiet", "--distro", "humble", "--tier", "box", "--tag", "nightly",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8_lossy(&out.stdout);
    let refs: Vec<&str> = stdout.lines().collect();
    assert_eq!(refs.len(), 8);
    assert!(refs.contains(&"docker.io/sshawn/humble-box:amd64"));
    assert!(refs.contains(&"registry.cn-beijing.aliyuncs.com/sshawn/humble-box:nightly"));
}

#[test]
fn test_plan_reads_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rosforge.yaml");
    std::fs::write(
        &path,
        "distros: [jazzy]\nplatforms: [linux/arm64]\nrebuild:\n  base: true\nregistries:\n  - address: ghcr.io\n    namespace: robots\n",
    )
    .unwrap();

    let out = rosforge(&["plan", "--quiet", "--config", path.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "ghcr.io/robots/jazzy:arm64");
}

#[test]
fn test_invalid_configuration_exits_non_zero() {
    let out = rosforge(&["plan", "--platform", "arm64"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Error: "));
}

fn login(home: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_rosforge"))
        .arg("login")
        .args(args)
        .env("HOME", home)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run rosforge");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn test_login_stores_credentials() {
    let home = tempfile::tempdir().unwrap();
    let out = login(
        home.path(),
        &["registry.cn-beijing.aliyuncs.com", "-u", "sshawn", "--password-stdin"],
        "secret\n",
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "Login Succeeded");

    let stored = std::fs::read_to_string(
        home.path().join(".rosforge").join("auth").join("credentials.json"),
    )
    .unwrap();
    assert!(stored.contains("registry.cn-beijing.aliyuncs.com"));
    assert!(stored.contains("secret"));
}

#[test]
fn test_login_without_password_fails() {
    let home = tempfile::tempdir().unwrap();
    let out = login(home.path(), &["-u", "sshawn", "--password-stdin"], "\n");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Username and password are required"));
    assert!(!home.path().join(".rosforge").exists());
}
