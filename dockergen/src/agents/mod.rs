//! Generation-service-backed agents: analyzer, generator and refiner.

use thiserror::Error;

use crate::core::error::GenerationError;
use crate::io::generation::GenerationRequest;
use crate::io::prompt::PromptPair;

pub mod analyzer;
pub mod generator;
pub mod refiner;

/// Failure of an agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("failed to render prompt: {0}")]
    Prompt(String),
    #[error("unsupported script language: {0}")]
    UnsupportedLanguage(String),
}

impl AgentError {
    pub(crate) fn prompt(err: &anyhow::Error) -> Self {
        AgentError::Prompt(format!("{err:#}"))
    }
}

/// Sampling settings for one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    /// `None` uses the service default.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub prompt_budget_bytes: usize,
}

impl AgentSettings {
    fn request(&self, prompt: PromptPair, purpose: &str) -> GenerationRequest {
        GenerationRequest {
            system: prompt.system,
            user: prompt.user,
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            purpose: purpose.to_string(),
        }
    }
}
