//! Investigation tests for `DockerSandbox` build, run and remove.
//!
//! # Prerequisites
//!
//! - Docker installed with a running daemon
//! - Network access to pull `python:3.11-slim`
//!
//! # Running
//!
//! ```bash
//! cargo test --test investigation_docker -- --ignored
//! cargo test --test investigation_docker docker_daemon_available -- --ignored
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use dockergen::io::sandbox::{DockerSandbox, Sandbox};
use tempfile::tempdir;

/// Build timeout generous enough for a cold base-image pull.
const BUILD_TIMEOUT: Duration = Duration::from_secs(300);
const RUN_TIMEOUT: Duration = Duration::from_secs(30);

fn sandbox() -> DockerSandbox {
    DockerSandbox::new("docker", BUILD_TIMEOUT, 100_000)
}

#[tokio::test]
#[ignore]
async fn docker_daemon_available() {
    sandbox()
        .check_available()
        .await
        .expect("docker daemon not reachable - start Docker first");
}

/// Verifies a tiny Python image builds, echoes its arguments and is removed.
#[tokio::test]
#[ignore]
async fn builds_runs_and_removes_python_image() {
    let dir = tempdir().expect("tempdir");
    let script = dir.path().join("echo.py");
    fs::write(&script, "import sys\nprint(' '.join(sys.argv[1:]))\n").expect("write script");
    let spec = dir.path().join("Dockerfile");
    fs::write(
        &spec,
        "FROM python:3.11-slim\nWORKDIR /app\nCOPY echo.py .\nENTRYPOINT [\"python\", \"echo.py\"]\n",
    )
    .expect("write Dockerfile");

    let docker = sandbox();
    let build = docker.build(&spec, dir.path(), &script).await.expect("build");
    assert!(build.success, "build failed: {:?}\n{}", build.error, build.logs);

    let args = vec!["hello".to_string(), "world".to_string()];
    let run = docker
        .run(&build.artifact_id, &args, RUN_TIMEOUT, &BTreeMap::new())
        .await
        .expect("run");
    assert!(run.success, "run failed: {:?}", run.error);
    assert_eq!(run.output.trim(), "hello world");

    docker.remove(&build.artifact_id).await.expect("remove");
}

/// Verifies a broken Dockerfile yields a failed outcome with a reason, not an error.
#[tokio::test]
#[ignore]
async fn broken_build_reports_reason() {
    let dir = tempdir().expect("tempdir");
    let script = dir.path().join("app.py");
    fs::write(&script, "print('hi')\n").expect("write script");
    let spec = dir.path().join("Dockerfile");
    fs::write(
        &spec,
        "FROM python:3.11-slim\nRUN pip install package-that-does-not-exist-dockergen\n",
    )
    .expect("write Dockerfile");

    let build = sandbox().build(&spec, dir.path(), &script).await.expect("build");
    assert!(!build.success);
    let reason = build.error.expect("build error");
    assert!(!reason.trim().is_empty());
}
