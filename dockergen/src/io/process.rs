//! Async child-process runner used by the Docker sandbox.
//!
//! Both pipes are drained on their own tasks while the child runs, so a chatty
//! `docker build` can never block on a full pipe. Each stream keeps at most a
//! fixed number of bytes; the rest is counted and discarded.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

const READ_CHUNK: usize = 8192;

/// Bytes kept from one stream, plus how many were discarded past the cap.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    fn push(&mut self, data: &[u8], cap: usize) {
        let room = cap.saturating_sub(self.bytes.len());
        let keep = data.len().min(room);
        self.bytes.extend_from_slice(&data[..keep]);
        self.dropped += data.len() - keep;
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    /// The child outlived its deadline and was killed.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        self.stdout.lossy()
    }

    pub fn stderr_lossy(&self) -> String {
        self.stderr.lossy()
    }

    /// Stdout then stderr as one log, noting any discarded bytes under `label`.
    pub fn combined(&self, label: &str) -> String {
        let mut log = self.stdout.lossy();
        if self.stdout.dropped > 0 {
            log.push_str(&format!("\n[{label}: {} stdout bytes omitted]\n", self.stdout.dropped));
        }
        let stderr = self.stderr.lossy();
        if !stderr.is_empty() && !log.is_empty() && !log.ends_with('\n') {
            log.push('\n');
        }
        log.push_str(&stderr);
        if self.stderr.dropped > 0 {
            log.push_str(&format!("\n[{label}: {} stderr bytes omitted]\n", self.stderr.dropped));
        }
        log
    }
}

/// Spawn `cmd` with a closed stdin and wait at most `timeout`.
///
/// A timeout is not an error: the child is killed and the output returned
/// with `timed_out` set. Dropping the future kills the child as well.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), cap = output_cap))]
pub async fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_cap: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        error!(err = %e, "spawn failed");
        anyhow!(e).context("spawn command")
    })?;
    debug!(pid = ?child.id(), "child spawned");

    let stdout = drain(child.stdout.take().context("child stdout missing")?, output_cap);
    let stderr = drain(child.stderr.take().context("child stderr missing")?, output_cap);

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(waited) => (waited.context("wait for child")?, false),
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "deadline passed, killing child");
            child.kill().await.context("kill child")?;
            (child.wait().await.context("reap killed child")?, true)
        }
    };

    let stdout = collect(stdout).await.context("collect stdout")?;
    let stderr = collect(stderr).await.context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(stdout_dropped = stdout.dropped, stderr_dropped = stderr.dropped, "output capped");
    }
    debug!(code = ?status.code(), timed_out, "child exited");

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn drain<R>(mut reader: R, cap: usize) -> JoinHandle<Result<Captured>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Captured::default();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut chunk).await.context("read pipe")?;
            if n == 0 {
                return Ok(captured);
            }
            captured.push(&chunk[..n], cap);
        }
    })
}

async fn collect(handle: JoinHandle<Result<Captured>>) -> Result<Captured> {
    handle
        .await
        .map_err(|e| anyhow!("pipe reader task failed: {e}"))?
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captured_counts_bytes_past_cap() {
        let mut captured = Captured::default();
        captured.push(b"abc", 4);
        captured.push(b"def", 4);
        assert_eq!(captured.bytes, b"abcd");
        assert_eq!(captured.dropped, 2);
    }

    #[tokio::test]
    async fn exit_code_and_both_streams_are_kept() {
        let out = run_command_with_timeout(
            sh("echo built; echo warning 1>&2; exit 3"),
            Duration::from_secs(5),
            1024,
        )
        .await
        .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout_lossy(), "built\n");
        assert_eq!(out.combined("build"), "built\nwarning\n");
    }

    #[tokio::test]
    async fn output_past_cap_is_omitted() {
        let out = run_command_with_timeout(sh("printf 'abcdefghij'"), Duration::from_secs(5), 4)
            .await
            .expect("run");
        assert_eq!(out.stdout.bytes, b"abcd");
        assert_eq!(out.stdout.dropped, 6);
        assert!(out.combined("run").contains("[run: 6 stdout bytes omitted]"));
    }

    #[tokio::test]
    async fn child_sees_closed_stdin() {
        let out = run_command_with_timeout(sh("cat"), Duration::from_secs(5), 1024)
            .await
            .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout_lossy(), "");
    }

    #[tokio::test]
    async fn slow_child_is_killed() {
        let out = run_command_with_timeout(sh("exec sleep 5"), Duration::from_millis(100), 1024)
            .await
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
    }
}
