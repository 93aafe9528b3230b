//! Investigation tests for the real Docker daemon.
//!
//! These tests exercise `DockerSandbox` against a local daemon and are
//! excluded from regular CI runs because they need Docker and network access
//! to pull base images.
//!
//! Run with: `cargo test -p dockergen --test investigation_docker -- --ignored`

#[path = "investigation/docker.rs"]
mod docker;
