//! Refiner agent: turns build/validation failures into a revised Dockerfile.

use tracing::{info, instrument, warn};

use super::{AgentError, AgentSettings};
use crate::core::spec_text::parse_refinement;
use crate::core::types::RefinementOutcome;
use crate::io::generation::GenerationService;
use crate::io::prompt::{PromptBuilder, RefineInputs};

#[derive(Debug, Clone)]
pub struct RefinerAgent {
    settings: AgentSettings,
}

impl RefinerAgent {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }

    /// Ask for a revision. Service failures are returned; an answer that
    /// cannot be parsed yields `fallback_spec`.
    #[instrument(skip_all, fields(
        build_error = input.build_error.is_some(),
        validation_error = input.validation_error.is_some(),
    ))]
    pub async fn refine<G: GenerationService>(
        &self,
        service: &G,
        input: &RefineInputs<'_>,
        fallback_spec: &str,
    ) -> Result<RefinementOutcome, AgentError> {
        let prompt = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .refine(input)
            .map_err(|e| AgentError::prompt(&e))?;
        let response = service
            .generate(&self.settings.request(prompt, "refine"))
            .await?;
        let outcome = parse_refinement(&response.content, fallback_spec);
        if outcome.fallback {
            warn!("refinement answer unusable, using fallback build spec");
        } else {
            info!(changes = %outcome.changes, "build spec refined");
        }
        Ok(outcome)
    }
}
