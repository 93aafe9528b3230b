//! Build-spec (Dockerfile) generator for single scripts.
//!
//! A run analyzes a script, asks a generation service for a Dockerfile,
//! builds it in a sandbox, probes the resulting image, and feeds failures
//! back into bounded refinement cycles. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (budget, classification,
//!   transitions, verdicts). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (generation service, Docker sandbox,
//!   prompts, output files). Isolated behind traits to enable fakes in tests.
//!
//! Orchestration modules ([`agents`], [`step`], [`validate`], [`refine`],
//! [`looping`]) coordinate core logic with I/O to implement one run.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod refine;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
