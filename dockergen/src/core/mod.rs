//! Deterministic, pure logic shared by the workflow engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod analysis;
pub mod behavior;
pub mod budget;
pub mod classifier;
pub mod error;
pub mod sanitize;
pub mod spec_text;
pub mod transitions;
pub mod types;
pub mod usage;
pub mod verdict;
