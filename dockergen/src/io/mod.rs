//! Side-effecting adapters: config, generation service, sandbox, prompts, output.

pub mod config;
pub mod generation;
pub mod output;
pub mod process;
pub mod prompt;
pub mod sandbox;
