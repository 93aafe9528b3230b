//! Analyzer agent: heuristics plus optional hints from the generation service.

use std::path::Path;

use anyhow::{Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{AgentError, AgentSettings};
use crate::core::analysis::{AnalysisHints, build_analysis, detect_language, extract_dependencies};
use crate::core::classifier::classify;
use crate::core::types::ScriptAnalysis;
use crate::io::generation::GenerationService;
use crate::io::prompt::PromptBuilder;

const ANALYSIS_SCHEMA: &str = include_str!("../io/schemas/analysis.schema.json");

#[derive(Debug, Clone)]
pub struct AnalyzerAgent {
    settings: AgentSettings,
}

impl AnalyzerAgent {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }

    /// Analyze a script.
    ///
    /// Recoverable service failures and unusable answers degrade to pure
    /// heuristics. Fatal failures (auth, rate limit, budget) are returned.
    #[instrument(skip_all, fields(script = %script_path.display()))]
    pub async fn analyze<G: GenerationService>(
        &self,
        service: &G,
        script_path: &Path,
        content: &str,
    ) -> Result<ScriptAnalysis, AgentError> {
        let language = detect_language(script_path, content)
            .ok_or_else(|| AgentError::UnsupportedLanguage(script_path.display().to_string()))?;
        let script_name = script_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_string());
        let dependencies = extract_dependencies(content, language);
        debug!(%language, deps = dependencies.len(), "heuristic analysis done");

        let prompt = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .analyze(language, &script_name, content, &dependencies)
            .map_err(|e| AgentError::prompt(&e))?;
        let hints = match service
            .generate(&self.settings.request(prompt, "analyze"))
            .await
        {
            Ok(response) => parse_hints(&response.content).unwrap_or_else(|err| {
                warn!(err = %err, "unusable analysis answer, using heuristics");
                AnalysisHints::default()
            }),
            Err(err) if !classify(&err).is_fatal() => {
                warn!(err = %err, "analysis call failed, using heuristics");
                AnalysisHints::default()
            }
            Err(err) => return Err(err.into()),
        };

        Ok(build_analysis(language, &script_name, content, &hints))
    }
}

/// Parse and schema-check the analyzer's JSON answer.
pub fn parse_hints(answer: &str) -> Result<AnalysisHints> {
    let json = json_object(answer).ok_or_else(|| anyhow!("no JSON object in answer"))?;
    let value: Value = serde_json::from_str(json)?;
    let schema: Value = serde_json::from_str(ANALYSIS_SCHEMA)?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !validator.is_valid(&value) {
        let messages = validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "analysis schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(serde_json::from_value(value)?)
}

/// Outermost `{ ... }` span, tolerating fences and prose around it.
fn json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GenerationError;
    use crate::core::types::Language;
    use crate::test_support::ScriptedGenerator;

    fn agent() -> AnalyzerAgent {
        AnalyzerAgent::new(AgentSettings {
            model: None,
            temperature: 0.1,
            max_tokens: 1000,
            prompt_budget_bytes: 24_000,
        })
    }

    #[test]
    fn hints_accept_fenced_json() {
        let answer = "```json\n{\"base_image\": \"python:3.12-slim\", \"additional_packages\": [\"curl\"]}\n```";
        let hints = parse_hints(answer).expect("hints");
        assert_eq!(hints.base_image.as_deref(), Some("python:3.12-slim"));
        assert_eq!(hints.additional_packages, vec!["curl".to_string()]);
    }

    #[test]
    fn hints_reject_schema_violations() {
        let err = parse_hints("{\"additional_packages\": \"curl\"}").unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
        assert!(parse_hints("no json here").is_err());
    }

    #[tokio::test]
    async fn merges_service_hints() {
        let service = ScriptedGenerator::new()
            .respond("{\"base_image\": \"python:3.12-slim\", \"environment_vars\": {\"PYTHONUNBUFFERED\": \"1\"}}");
        let analysis = agent()
            .analyze(&service, Path::new("app.py"), "import requests\nprint('hi')\n")
            .await
            .expect("analysis");
        assert_eq!(analysis.language, Language::Python);
        assert_eq!(analysis.base_image, "python:3.12-slim");
        assert_eq!(analysis.dependencies, vec!["requests".to_string()]);
        assert_eq!(
            analysis.environment_vars.get("PYTHONUNBUFFERED").map(String::as_str),
            Some("1")
        );
        assert_eq!(service.purposes(), vec!["analyze".to_string()]);
    }

    /// Verifies a recoverable failure keeps the heuristic result.
    #[tokio::test]
    async fn recoverable_failure_falls_back_to_heuristics() {
        let service = ScriptedGenerator::new().fail(GenerationError::malformed("garbled"));
        let analysis = agent()
            .analyze(&service, Path::new("run.sh"), "echo hi\n")
            .await
            .expect("analysis");
        assert_eq!(analysis.language, Language::Bash);
        assert_eq!(analysis.base_image, Language::Bash.default_base_image());
    }

    #[tokio::test]
    async fn fatal_failure_is_returned() {
        let service = ScriptedGenerator::new().fail(GenerationError::auth("bad key"));
        let err = agent()
            .analyze(&service, Path::new("app.py"), "print('hi')\n")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Generation(_)));
    }

    #[tokio::test]
    async fn unknown_language_is_rejected_without_a_call() {
        let service = ScriptedGenerator::new();
        let err = agent()
            .analyze(&service, Path::new("data.txt"), "plain words only")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedLanguage(_)));
        assert_eq!(service.calls(), 0);
    }
}
