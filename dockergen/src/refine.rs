//! Refinement controller: bounds revise-and-retry cycles.

use tracing::{info, instrument};

use crate::agents::AgentError;
use crate::agents::refiner::RefinerAgent;
use crate::core::spec_text::fallback_build_spec;
use crate::core::types::{BuildOutcome, RefinementOutcome, ScriptAnalysis};
use crate::io::generation::GenerationService;
use crate::io::prompt::{RefineInputs, log_tail};

/// Result of one controller invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefineStep {
    /// The cap was already reached; no call was made.
    Exhausted,
    Revised(RefinementOutcome),
}

/// Failure context handed to a refinement.
#[derive(Debug, Clone, Copy)]
pub struct RefinementContext<'a> {
    pub current_spec: &'a str,
    pub build: Option<&'a BuildOutcome>,
    pub validation_error: Option<&'a str>,
    pub analysis: Option<&'a ScriptAnalysis>,
    pub script_name: &'a str,
}

#[derive(Debug, Clone)]
pub struct RefinementController {
    agent: RefinerAgent,
    max_refinements: u32,
    log_tail_chars: usize,
}

impl RefinementController {
    pub fn new(agent: RefinerAgent, max_refinements: u32, log_tail_chars: usize) -> Self {
        Self {
            agent,
            max_refinements,
            log_tail_chars,
        }
    }

    pub fn max_refinements(&self) -> u32 {
        self.max_refinements
    }

    pub fn is_exhausted(&self, refinement_count: u32) -> bool {
        refinement_count >= self.max_refinements
    }

    /// Ask for one revision unless the cap is reached.
    ///
    /// Service failures are returned for classification; unusable answers
    /// already degrade to a minimal build spec inside the agent.
    #[instrument(skip_all, fields(count = refinement_count, max = self.max_refinements))]
    pub async fn refine<G: GenerationService>(
        &self,
        service: &G,
        refinement_count: u32,
        ctx: &RefinementContext<'_>,
    ) -> Result<RefineStep, AgentError> {
        if self.is_exhausted(refinement_count) {
            return Ok(RefineStep::Exhausted);
        }
        let build_error = ctx
            .build
            .filter(|b| !b.success)
            .and_then(|b| b.error.as_deref());
        let build_log_tail = ctx
            .build
            .map(|b| log_tail(&b.logs, self.log_tail_chars))
            .filter(|tail| !tail.trim().is_empty());
        let inputs = RefineInputs {
            current_spec: ctx.current_spec,
            build_error,
            validation_error: ctx.validation_error,
            build_log_tail,
        };
        let fallback = fallback_build_spec(ctx.analysis, ctx.script_name);
        let outcome = self.agent.refine(service, &inputs, &fallback).await?;
        info!(attempt = refinement_count + 1, fallback = outcome.fallback, "refinement produced");
        Ok(RefineStep::Revised(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentSettings;
    use crate::core::error::GenerationError;
    use crate::test_support::ScriptedGenerator;

    fn controller(max: u32) -> RefinementController {
        let agent = RefinerAgent::new(AgentSettings {
            model: None,
            temperature: 0.1,
            max_tokens: 2500,
            prompt_budget_bytes: 24_000,
        });
        RefinementController::new(agent, max, 10)
    }

    fn failed_build() -> BuildOutcome {
        BuildOutcome {
            success: false,
            artifact_id: "img".to_string(),
            logs: "Step 1/2\nERROR: pip exploded badly".to_string(),
            error: Some("Docker build failed: pip exploded".to_string()),
            duration_secs: 1.0,
        }
    }

    #[tokio::test]
    async fn exhausted_controller_makes_no_call() {
        let service = ScriptedGenerator::new();
        let ctx = RefinementContext {
            current_spec: "FROM x",
            build: None,
            validation_error: Some("failed"),
            analysis: None,
            script_name: "app.py",
        };
        let step = controller(3).refine(&service, 3, &ctx).await.expect("step");
        assert_eq!(step, RefineStep::Exhausted);
        assert_eq!(service.calls(), 0);
    }

    /// Verifies the prompt carries the build error and only the log tail.
    #[tokio::test]
    async fn packages_build_failure_context() {
        let service = ScriptedGenerator::new().respond("IMPROVED_DOCKERFILE:\nFROM python:3.11-slim\n");
        let build = failed_build();
        let ctx = RefinementContext {
            current_spec: "FROM python:3.11-slim\nRUN pip install nope",
            build: Some(&build),
            validation_error: None,
            analysis: None,
            script_name: "app.py",
        };
        let step = controller(3).refine(&service, 0, &ctx).await.expect("step");
        match step {
            RefineStep::Revised(outcome) => assert_eq!(outcome.build_spec, "FROM python:3.11-slim"),
            other => panic!("unexpected step: {other:?}"),
        }
        let user = &service.requests()[0].user;
        assert!(user.contains("Docker build failed: pip exploded"));
        assert!(user.contains("ded badly"));
        assert!(!user.contains("Step 1/2"));
    }

    #[tokio::test]
    async fn garbled_answer_falls_back_to_minimal_spec() {
        let service = ScriptedGenerator::new().respond("???");
        let ctx = RefinementContext {
            current_spec: "FROM broken",
            build: None,
            validation_error: Some("Validation failed: Example Usage tests failed"),
            analysis: None,
            script_name: "tool.py",
        };
        let RefineStep::Revised(outcome) = controller(3).refine(&service, 1, &ctx).await.expect("step")
        else {
            panic!("expected a revision");
        };
        assert!(outcome.fallback);
        assert!(outcome.build_spec.starts_with("FROM python:3.11-slim"));
        assert!(outcome.build_spec.contains("tool.py"));
    }

    #[tokio::test]
    async fn service_failure_is_returned() {
        let service = ScriptedGenerator::new().fail(GenerationError::rate_limited("slow down"));
        let ctx = RefinementContext {
            current_spec: "FROM x",
            build: None,
            validation_error: None,
            analysis: None,
            script_name: "app.py",
        };
        let err = controller(3).refine(&service, 0, &ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::Generation(_)));
    }
}
