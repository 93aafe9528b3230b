//! Build/execution sandbox seam and its `docker` CLI adapter.

use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::core::error::{SandboxError, SandboxErrorKind};
use crate::core::types::{BuildOutcome, RunOutcome};
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// A container engine that can build artifacts and run them in throwaway instances.
pub trait Sandbox {
    /// Build an artifact. A failed build is an `Ok` outcome with `success == false`;
    /// `Err` means the sandbox itself could not be used.
    fn build(
        &self,
        spec_path: &Path,
        context_dir: &Path,
        primary_file: &Path,
    ) -> impl Future<Output = Result<BuildOutcome, SandboxError>> + Send;

    /// Run the artifact's entrypoint with `args` in a fresh instance.
    ///
    /// `Err` means the instance could not be launched or was torn down
    /// concurrently; a non-zero exit or a timeout is an `Ok` outcome.
    fn run(
        &self,
        artifact_id: &str,
        args: &[String],
        timeout: Duration,
        env: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<RunOutcome, SandboxError>> + Send;

    fn remove(&self, artifact_id: &str) -> impl Future<Output = Result<(), SandboxError>> + Send;
}

impl<T: Sandbox + Sync> Sandbox for &T {
    fn build(
        &self,
        spec_path: &Path,
        context_dir: &Path,
        primary_file: &Path,
    ) -> impl Future<Output = Result<BuildOutcome, SandboxError>> + Send {
        (**self).build(spec_path, context_dir, primary_file)
    }

    fn run(
        &self,
        artifact_id: &str,
        args: &[String],
        timeout: Duration,
        env: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<RunOutcome, SandboxError>> + Send {
        (**self).run(artifact_id, args, timeout, env)
    }

    fn remove(&self, artifact_id: &str) -> impl Future<Output = Result<(), SandboxError>> + Send {
        (**self).remove(artifact_id)
    }
}

/// Files from the context directory that never go into the build context.
const CONTEXT_EXCLUDES: &[&str] = &["Dockerfile", "run_summary.json", "costs.json", ".dockerignore"];

const DOCKERIGNORE: &str = "\
.git
.gitignore
*.pyc
__pycache__/
.pytest_cache/
.coverage
.env
.venv
venv/
node_modules/
.DS_Store
*.log
.idea/
.vscode/
*.swp
*~
";

/// Daemon messages meaning the instance was removed underneath us.
const REMOVAL_RACE_MARKERS: &[&str] = &[
    "marked for removal",
    "removal of container",
    "already in progress",
    "is dead",
];

/// Exit status of `docker run` itself failing (as opposed to the container).
const DOCKER_RUN_DAEMON_ERROR: i32 = 125;

const REMOVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Sandbox backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    docker_bin: String,
    build_timeout: Duration,
    output_limit_bytes: usize,
}

impl DockerSandbox {
    pub fn new(docker_bin: impl Into<String>, build_timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            build_timeout,
            output_limit_bytes,
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.docker_bin)
    }

    /// Fail fast when the daemon is not reachable.
    #[instrument(skip_all)]
    pub async fn check_available(&self) -> Result<(), SandboxError> {
        let mut cmd = self.command();
        cmd.args(["version", "--format", "{{.Server.Version}}"]);
        let out = run_command_with_timeout(cmd, Duration::from_secs(15), 4096)
            .await
            .map_err(|e| unavailable(&e))?;
        if !out.success() {
            return Err(SandboxError::new(
                SandboxErrorKind::Unavailable,
                format!(
                    "Docker is not available. Please ensure Docker is installed and running. {}",
                    out.stderr_lossy().trim()
                ),
            ));
        }
        debug!(server = %out.stdout_lossy().trim(), "docker daemon reachable");
        Ok(())
    }
}

fn unavailable(err: &anyhow::Error) -> SandboxError {
    SandboxError::new(
        SandboxErrorKind::Unavailable,
        format!("failed to invoke docker: {err:#}"),
    )
}

/// Assemble a temporary build context: Dockerfile, primary file, sibling files
/// of `context_dir`, and a default `.dockerignore`.
fn prepare_context(spec_path: &Path, context_dir: &Path, primary_file: &Path) -> Result<tempfile::TempDir> {
    let ctx = tempfile::Builder::new()
        .prefix("dockergen-ctx-")
        .tempdir()
        .context("create build context dir")?;
    fs::copy(spec_path, ctx.path().join("Dockerfile"))
        .with_context(|| format!("copy {}", spec_path.display()))?;
    let primary_name = primary_file
        .file_name()
        .with_context(|| format!("primary file has no name {}", primary_file.display()))?;
    fs::copy(primary_file, ctx.path().join(primary_name))
        .with_context(|| format!("copy {}", primary_file.display()))?;

    if context_dir.is_dir() {
        let entries = fs::read_dir(context_dir)
            .with_context(|| format!("read context dir {}", context_dir.display()))?;
        for entry in entries {
            let entry = entry.context("read context entry")?;
            let path = entry.path();
            let name = entry.file_name();
            let skip = !path.is_file()
                || name == primary_name
                || CONTEXT_EXCLUDES.iter().any(|ex| name == *ex);
            if skip {
                continue;
            }
            fs::copy(&path, ctx.path().join(&name))
                .with_context(|| format!("copy {}", path.display()))?;
        }
    }

    fs::write(ctx.path().join(".dockerignore"), DOCKERIGNORE).context("write .dockerignore")?;
    Ok(ctx)
}

/// `true` when daemon output reports the instance was removed concurrently.
pub fn is_removal_race(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    REMOVAL_RACE_MARKERS.iter().any(|m| lower.contains(m))
}

/// One-line reason for a failed build, taken from the most specific log line.
pub fn build_error_summary(logs: &str) -> String {
    let lines: Vec<&str> = logs.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let reason = lines
        .iter()
        .rev()
        .find(|l| l.to_ascii_lowercase().contains("error"))
        .or_else(|| lines.last())
        .copied()
        .unwrap_or("no build output");
    format!("Docker build failed: {reason}")
}

/// Owns a named container for the length of one run.
///
/// The normal path awaits [`ContainerGuard::release`]. A guard dropped
/// unreleased (cancellation, panic) schedules the removal on the runtime
/// instead of blocking the dropping task.
struct ContainerGuard {
    docker_bin: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker_bin: &str, name: &str) -> Self {
        Self {
            docker_bin: docker_bin.to_string(),
            name: name.to_string(),
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        remove_container(&self.docker_bin, &self.name).await;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.name, "no runtime left to remove container");
            return;
        };
        let docker_bin = std::mem::take(&mut self.docker_bin);
        let name = std::mem::take(&mut self.name);
        runtime.spawn(async move { remove_container(&docker_bin, &name).await });
    }
}

async fn remove_container(docker_bin: &str, name: &str) {
    let mut cmd = Command::new(docker_bin);
    cmd.args(["rm", "-f", name]);
    match run_command_with_timeout(cmd, REMOVE_TIMEOUT, 4096).await {
        Ok(out) if out.success() => debug!(container = %name, "container removed"),
        // `rm -f` on a container that never started is expected to fail.
        Ok(out) => debug!(container = %name, stderr = %out.stderr_lossy().trim(), "container not removed"),
        Err(err) => warn!(container = %name, err = %format!("{err:#}"), "failed to remove container"),
    }
}

fn run_outcome(out: &CommandOutput, timeout: Duration) -> RunOutcome {
    let output = out.combined("container");
    if out.timed_out {
        return RunOutcome {
            success: false,
            exit_code: None,
            output,
            error: Some(format!(
                "Container execution timed out after {}s",
                timeout.as_secs()
            )),
            timed_out: true,
        };
    }
    let exit_code = out.status.code();
    let success = exit_code == Some(0);
    let error = if success {
        None
    } else if output.trim().is_empty() {
        Some(format!("Container exited with status {exit_code:?}"))
    } else {
        Some(output.trim().to_string())
    };
    RunOutcome {
        success,
        exit_code,
        output,
        error,
        timed_out: false,
    }
}

impl Sandbox for DockerSandbox {
    #[instrument(skip_all, fields(spec = %spec_path.display()))]
    async fn build(
        &self,
        spec_path: &Path,
        context_dir: &Path,
        primary_file: &Path,
    ) -> Result<BuildOutcome, SandboxError> {
        let tag = format!("dockergen-{:08x}", rand::random::<u32>());
        let ctx = prepare_context(spec_path, context_dir, primary_file).map_err(|e| {
            SandboxError::new(
                SandboxErrorKind::Io,
                format!("failed to prepare build context: {e:#}"),
            )
        })?;

        let mut cmd = self.command();
        cmd.arg("build")
            .arg("--rm")
            .arg("--force-rm")
            .arg("-t")
            .arg(&tag)
            .arg(ctx.path());
        info!(tag = %tag, "building image");
        let started = Instant::now();
        let out = run_command_with_timeout(cmd, self.build_timeout, self.output_limit_bytes)
            .await
            .map_err(|e| unavailable(&e))?;
        let duration_secs = started.elapsed().as_secs_f64();
        let logs = out.combined("build");

        let error = if out.timed_out {
            Some(format!(
                "Docker build timed out after {}s",
                self.build_timeout.as_secs()
            ))
        } else if out.success() {
            None
        } else {
            Some(build_error_summary(&logs))
        };
        debug!(success = error.is_none(), duration_secs, "build finished");
        Ok(BuildOutcome {
            success: error.is_none(),
            artifact_id: tag,
            logs,
            error,
            duration_secs,
        })
    }

    #[instrument(skip_all, fields(artifact = %artifact_id, args = args.len(), timeout_secs = timeout.as_secs()))]
    async fn run(
        &self,
        artifact_id: &str,
        args: &[String],
        timeout: Duration,
        env: &BTreeMap<String, String>,
    ) -> Result<RunOutcome, SandboxError> {
        let name = format!("{artifact_id}-run-{:08x}", rand::random::<u32>());
        let guard = ContainerGuard::new(&self.docker_bin, &name);

        let mut cmd = self.command();
        cmd.arg("run").arg("--name").arg(&name);
        for (key, value) in env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.arg(artifact_id).args(args);

        let out = run_command_with_timeout(cmd, timeout, self.output_limit_bytes).await;
        guard.release().await;
        let out = out.map_err(|e| unavailable(&e))?;

        if !out.timed_out && out.status.code() == Some(DOCKER_RUN_DAEMON_ERROR) {
            let stderr = out.stderr_lossy();
            let kind = if is_removal_race(&stderr) {
                SandboxErrorKind::TargetRemoved
            } else {
                SandboxErrorKind::Launch
            };
            warn!(?kind, "container launch failed");
            return Err(SandboxError::new(kind, stderr.trim().to_string()));
        }
        if !out.success() && is_removal_race(&out.stderr_lossy()) {
            return Err(SandboxError::new(
                SandboxErrorKind::TargetRemoved,
                out.stderr_lossy().trim().to_string(),
            ));
        }
        Ok(run_outcome(&out, timeout))
    }

    #[instrument(skip_all, fields(artifact = %artifact_id))]
    async fn remove(&self, artifact_id: &str) -> Result<(), SandboxError> {
        let mut cmd = self.command();
        cmd.args(["rmi", "-f", artifact_id]);
        let out = run_command_with_timeout(cmd, REMOVE_TIMEOUT, 4096)
            .await
            .map_err(|e| unavailable(&e))?;
        if !out.success() {
            return Err(SandboxError::new(
                SandboxErrorKind::Io,
                format!(
                    "failed to remove image {artifact_id}: {}",
                    out.stderr_lossy().trim()
                ),
            ));
        }
        info!("removed image");
        Ok(())
    }
}
