//! Stable exit codes for the `dockergen` CLI.

/// Build spec generated, built and validated.
pub const OK: i32 = 0;
/// Invalid input, configuration error, or the run completed without success.
pub const FAILURE: i32 = 1;
/// Interrupted by the user (Ctrl-C).
pub const INTERRUPTED: i32 = 130;
