//! Generator agent: asks the service for a Dockerfile and extracts it.

use tracing::{debug, instrument};

use super::{AgentError, AgentSettings};
use crate::core::error::GenerationError;
use crate::core::spec_text::extract_build_spec;
use crate::io::generation::GenerationService;
use crate::io::prompt::{GenerateInputs, PromptBuilder};

#[derive(Debug, Clone)]
pub struct GeneratorAgent {
    settings: AgentSettings,
}

impl GeneratorAgent {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }

    /// Generate build-spec text. An answer without a `FROM` instruction is a
    /// malformed response.
    #[instrument(skip_all, fields(script = input.script_name, baseline = input.baseline.is_some()))]
    pub async fn generate<G: GenerationService>(
        &self,
        service: &G,
        input: &GenerateInputs<'_>,
    ) -> Result<String, AgentError> {
        let prompt = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .generate(input)
            .map_err(|e| AgentError::prompt(&e))?;
        let response = service
            .generate(&self.settings.request(prompt, "generate"))
            .await?;
        let spec = extract_build_spec(&response.content).ok_or_else(|| {
            GenerationError::malformed("generated answer contains no FROM instruction")
        })?;
        debug!(lines = spec.lines().count(), "build spec generated");
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::error::GenerationErrorKind;
    use crate::core::types::{Language, ScriptAnalysis};
    use crate::test_support::ScriptedGenerator;

    fn analysis() -> ScriptAnalysis {
        ScriptAnalysis {
            language: Language::Python,
            runtime_version: None,
            dependencies: Vec::new(),
            base_image: "python:3.11-slim".to_string(),
            entry_command: "python app.py".to_string(),
            additional_packages: Vec::new(),
            environment_vars: BTreeMap::new(),
        }
    }

    fn agent() -> GeneratorAgent {
        GeneratorAgent::new(AgentSettings {
            model: Some("gpt-4".to_string()),
            temperature: 0.1,
            max_tokens: 2000,
            prompt_budget_bytes: 24_000,
        })
    }

    #[tokio::test]
    async fn extracts_fenced_build_spec() {
        let service = ScriptedGenerator::new().respond(
            "Here you go:\n```dockerfile\nFROM python:3.11-slim\nCOPY app.py .\nENTRYPOINT [\"python\", \"app.py\"]\n```\nEnjoy.",
        );
        let analysis = analysis();
        let input = GenerateInputs {
            analysis: &analysis,
            script_name: "app.py",
            example_usage: None,
            baseline: None,
        };
        let spec = agent().generate(&service, &input).await.expect("spec");
        assert_eq!(
            spec,
            "FROM python:3.11-slim\nCOPY app.py .\nENTRYPOINT [\"python\", \"app.py\"]"
        );
        let requests = service.requests();
        assert_eq!(requests[0].model.as_deref(), Some("gpt-4"));
        assert_eq!(requests[0].max_tokens, 2000);
    }

    #[tokio::test]
    async fn baseline_reaches_the_prompt() {
        let service = ScriptedGenerator::new().respond("FROM python:3.12-slim\n");
        let analysis = analysis();
        let input = GenerateInputs {
            analysis: &analysis,
            script_name: "app.py",
            example_usage: Some("python app.py --name x"),
            baseline: Some("FROM python:3.12-slim\nRUN pip install requests"),
        };
        agent().generate(&service, &input).await.expect("spec");
        let user = &service.requests()[0].user;
        assert!(user.contains("RUN pip install requests"));
        assert!(user.contains("python app.py --name x"));
    }

    #[tokio::test]
    async fn answer_without_from_is_malformed() {
        let service = ScriptedGenerator::new().respond("I cannot help with that.");
        let analysis = analysis();
        let input = GenerateInputs {
            analysis: &analysis,
            script_name: "app.py",
            example_usage: None,
            baseline: None,
        };
        let err = agent().generate(&service, &input).await.unwrap_err();
        match err {
            AgentError::Generation(e) => assert_eq!(e.kind, GenerationErrorKind::MalformedResponse),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
