//! Docker Buildx engine.
//!
//! Each operation renders a small Dockerfile and feeds it to
//! `docker buildx build` on stdin. There is no build context; layer scripts
//! travel as heredocs.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rosforge_core::error::{ForgeError, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;

use super::ImageEngine;
use crate::artifact::Artifact;
use crate::customize::{LayerStep, APT_CACHE_DIR};
use crate::oci::{ImageReference, RegistryAuth};

/// Prefix of the local tags intermediate images are loaded under.
const LOCAL_TAG_PREFIX: &str = "rosforge-build";

const HEREDOC_MARKER: &str = "ROSFORGE_EOF";

/// Drives the `docker` CLI.
pub struct DockerEngine {
    binary: String,
    logins: DashMap<String, Arc<OnceCell<()>>>,
}

impl DockerEngine {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            logins: DashMap::new(),
        }
    }

    /// Log in to `registry` once per engine; later calls wait for the first.
    async fn ensure_login(
        &self,
        registry: &str,
        auth: &RegistryAuth,
    ) -> std::result::Result<(), RunFailure> {
        let (Some(username), Some(password)) = (auth.username(), auth.password()) else {
            return Ok(());
        };

        let cell = self
            .logins
            .entry(registry.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| async {
            tracing::debug!(registry, username, "Logging in");
            self.run(
                &["login", registry, "--username", username, "--password-stdin"],
                Some(password),
            )
            .await
            .map(|_| ())
        })
        .await?;
        Ok(())
    }

    /// Run the docker CLI, returning stdout.
    async fn run(
        &self,
        args: &[&str],
        stdin: Option<&str>,
    ) -> std::result::Result<String, RunFailure> {
        let spawn_error = |e: std::io::Error| {
            RunFailure::Spawn(ForgeError::Engine(format!(
                "Failed to run {}: {}",
                self.binary, e
            )))
        };

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await.map_err(spawn_error)?;
            pipe.shutdown().await.map_err(spawn_error)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RunFailure::Exit(format!(
                "{} {} exited with {}: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                output.status,
                tail(&stderr, 20)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// How a docker invocation failed.
enum RunFailure {
    /// The process could not be started or driven.
    Spawn(ForgeError),
    /// The process ran and exited non-zero; carries the stderr tail.
    Exit(String),
}

impl RunFailure {
    fn into_engine_error(self) -> ForgeError {
        match self {
            RunFailure::Spawn(e) => e,
            RunFailure::Exit(message) => ForgeError::Engine(message),
        }
    }

    /// A non-zero exit while pushing may succeed on the next attempt.
    fn into_push_error(self, target: &ImageReference) -> ForgeError {
        match self {
            RunFailure::Spawn(e) => e,
            RunFailure::Exit(message) => ForgeError::TransientPublish {
                registry: target.registry.clone(),
                reference: target.to_string(),
                message,
            },
        }
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageEngine for DockerEngine {
    async fn apply(&self, parent: &Artifact, step: &LayerStep) -> Result<Artifact> {
        let platform = parent.platform().to_string();
        let local_tag = format!("{}:{}", LOCAL_TAG_PREFIX, uuid::Uuid::new_v4());
        let dockerfile = render_dockerfile(parent, Some(step));

        tracing::info!(
            step = %step.name,
            parent = %parent.source(),
            platform = %platform,
            "Applying layer"
        );
        self.run(
            &[
                "buildx", "build", "--progress", "plain", "--platform", platform.as_str(), "--load",
                "--tag", local_tag.as_str(), "-",
            ],
            Some(&dockerfile),
        )
        .await
        .map_err(RunFailure::into_engine_error)?;

        Ok(Artifact::local(local_tag, parent.platform().clone()))
    }

    async fn push(
        &self,
        artifact: &Artifact,
        target: &ImageReference,
        auth: &RegistryAuth,
    ) -> Result<String> {
        self.ensure_login(&target.registry, auth)
            .await
            .map_err(|f| f.into_push_error(target))?;

        let platform = artifact.platform().to_string();
        let target_str = target.to_string();
        let dockerfile = render_dockerfile(artifact, None);
        let metadata_dir = tempfile::tempdir()?;
        let metadata_path = metadata_dir.path().join("metadata.json");
        let metadata_arg = metadata_path.to_string_lossy().into_owned();

        self.run(
            &[
                "buildx",
                "build",
                "--progress",
                "plain",
                "--platform",
                platform.as_str(),
                "--push",
                "--tag",
                target_str.as_str(),
                "--metadata-file",
                metadata_arg.as_str(),
                "-",
            ],
            Some(&dockerfile),
        )
        .await
        .map_err(|f| f.into_push_error(target))?;

        let metadata = tokio::fs::read_to_string(&metadata_path).await?;
        pushed_digest(&metadata).ok_or_else(|| {
            ForgeError::Engine(format!("No digest reported for {}", target_str))
        })
    }
}

/// Dockerfile building `artifact` plus its pending labels and, optionally,
/// one layer step.
pub fn render_dockerfile(artifact: &Artifact, step: Option<&LayerStep>) -> String {
    let mut out = String::from("# syntax=docker/dockerfile:1\n");
    out.push_str(&format!("FROM {}\n", artifact.source()));

    for (key, value) in artifact.labels() {
        out.push_str(&format!("LABEL {}={}\n", key, quote_value(value)));
    }

    if let Some(step) = step {
        out.push_str("RUN ");
        if let Some(cache_id) = &step.cache_id {
            out.push_str(&format!(
                "--mount=type=cache,id={},target={},sharing=locked ",
                cache_id, APT_CACHE_DIR
            ));
        }
        out.push_str(&format!("<<'{}'\n", HEREDOC_MARKER));
        out.push_str(&step.script);
        if !step.script.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(HEREDOC_MARKER);
        out.push('\n');
    }
    out
}

fn quote_value(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

/// `containerimage.digest` from a buildx metadata file.
fn pushed_digest(metadata: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(metadata).ok()?;
    value["containerimage.digest"].as_str().map(str::to_string)
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
