//! Prompt builder for the analyzer, generator and refiner.
//!
//! Templates are embedded at compile time. User prompts carry section markers
//! so that a byte budget can drop the least important context first.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::types::{Language, ScriptAnalysis};

const ANALYZE_SYSTEM: &str = include_str!("prompts/analyze_system.md");
const ANALYZE_USER: &str = include_str!("prompts/analyze_user.md");
const GENERATE_SYSTEM: &str = include_str!("prompts/generate_system.md");
const GENERATE_USER: &str = include_str!("prompts/generate_user.md");
const REFINE_SYSTEM: &str = include_str!("prompts/refine_system.md");
const REFINE_USER: &str = include_str!("prompts/refine_user.md");

/// Characters of script source sent to the analyzer.
const ANALYZE_SOURCE_CHARS: usize = 2000;

/// Drop order when a user prompt exceeds the budget.
const DROP_ORDER: &[&str] = &["logs", "guidance"];

/// System and user prompt of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("analyze_user", ANALYZE_USER),
            ("generate_user", GENERATE_USER),
            ("refine_user", REFINE_USER),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load template {name}"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render template {name}"))
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`. Empty
/// droppable sections are discarded.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in matches.iter().enumerate() {
        let Some(marker) = caps.get(0) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let required = &caps[2] == "required";
        let content = rendered[marker.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: caps[1].to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn truncate_to_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over budget: shorten the largest section, which is the script
    // source or the current Dockerfile in practice.
    let total = total_len(sections);
    if total > budget {
        let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
            return;
        };
        let excess = total - budget;
        let allowed = largest.content.len().saturating_sub(excess);
        let before_len = largest.content.len();
        if allowed > 12 {
            truncate_to_boundary(&mut largest.content, allowed - 12);
            largest.content.push_str("\n[truncated]");
        } else {
            truncate_to_boundary(&mut largest.content, allowed);
        }
        debug!(
            section = %largest.key,
            before_len,
            after_len = largest.content.len(),
            "truncated section for budget"
        );
    }
}

/// Trimmed text, or `None` when blank.
fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Context for a generation prompt.
#[derive(Debug, Clone, Copy)]
pub struct GenerateInputs<'a> {
    pub analysis: &'a ScriptAnalysis,
    pub script_name: &'a str,
    pub example_usage: Option<&'a str>,
    /// Revised Dockerfile from the latest refinement.
    pub baseline: Option<&'a str>,
}

/// Context for a refinement prompt.
#[derive(Debug, Clone, Copy)]
pub struct RefineInputs<'a> {
    pub current_spec: &'a str,
    pub build_error: Option<&'a str>,
    pub validation_error: Option<&'a str>,
    pub build_log_tail: Option<&'a str>,
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    fn finish(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }

    pub fn analyze(
        &self,
        language: Language,
        script_name: &str,
        content: &str,
        dependencies: &[String],
    ) -> Result<PromptPair> {
        let engine = PromptEngine::new()?;
        let source: String = content.chars().take(ANALYZE_SOURCE_CHARS).collect();
        let rendered = engine.render(
            "analyze_user",
            context! {
                language => language.as_str(),
                script_name => script_name,
                dependencies => dependencies,
                content => source.trim_end(),
            },
        )?;
        Ok(PromptPair {
            system: ANALYZE_SYSTEM.trim().to_string(),
            user: self.finish(&rendered),
        })
    }

    pub fn generate(&self, input: &GenerateInputs<'_>) -> Result<PromptPair> {
        let engine = PromptEngine::new()?;
        let analysis = input.analysis;
        let env: &BTreeMap<String, String> = &analysis.environment_vars;
        let rendered = engine.render(
            "generate_user",
            context! {
                language => analysis.language.as_str(),
                script_name => input.script_name,
                base_image => &analysis.base_image,
                runtime_version => &analysis.runtime_version,
                entry_command => &analysis.entry_command,
                dependencies => &analysis.dependencies,
                additional_packages => &analysis.additional_packages,
                environment_vars => env,
                example_usage => input.example_usage.map(str::trim).filter(|s| !s.is_empty()),
                baseline => input.baseline.map(str::trim).filter(|s| !s.is_empty()),
            },
        )?;
        Ok(PromptPair {
            system: GENERATE_SYSTEM.trim().to_string(),
            user: self.finish(&rendered),
        })
    }

    pub fn refine(&self, input: &RefineInputs<'_>) -> Result<PromptPair> {
        let engine = PromptEngine::new()?;
        let rendered = engine.render(
            "refine_user",
            context! {
                current_spec => input.current_spec.trim(),
                build_error => non_empty(input.build_error),
                validation_error => non_empty(input.validation_error),
                build_logs => non_empty(input.build_log_tail),
            },
        )?;
        Ok(PromptPair {
            system: REFINE_SYSTEM.trim().to_string(),
            user: self.finish(&rendered),
        })
    }
}

/// Last `max_chars` characters of a build log.
pub fn log_tail(logs: &str, max_chars: usize) -> &str {
    let total = logs.chars().count();
    if total <= max_chars {
        return logs;
    }
    let skip = total - max_chars;
    let start = logs.char_indices().nth(skip).map_or(logs.len(), |(i, _)| i);
    &logs[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(language: Language) -> ScriptAnalysis {
        ScriptAnalysis {
            language,
            runtime_version: Some("3.11".to_string()),
            dependencies: vec!["requests".to_string()],
            base_image: language.default_base_image().to_string(),
            entry_command: format!("{} app", language.interpreter()),
            additional_packages: Vec::new(),
            environment_vars: BTreeMap::from([("MODE".to_string(), "prod".to_string())]),
        }
    }

    /// Verifies the generation prompt carries the analysis and the refinement baseline.
    #[test]
    fn generate_prompt_includes_analysis_and_baseline() {
        let analysis = analysis(Language::Python);
        let pair = PromptBuilder::new(20_000)
            .generate(&GenerateInputs {
                analysis: &analysis,
                script_name: "app.py",
                example_usage: Some("python app.py 'hello world'"),
                baseline: Some("FROM python:3.12-slim\nCOPY app.py ."),
            })
            .expect("render");

        assert!(pair.system.contains("ENTRYPOINT"));
        assert!(pair.user.contains("Base image: python:3.11-slim"));
        assert!(pair.user.contains("Dependencies: requests"));
        assert!(pair.user.contains("- MODE=prod"));
        assert!(pair.user.contains("Example usage: python app.py 'hello world'"));
        assert!(pair.user.contains("FROM python:3.12-slim"));
        assert!(pair.user.contains("Python notes:"));
        assert!(!pair.user.contains("<!--"), "markers are stripped");
    }

    #[test]
    fn generate_prompt_without_baseline_omits_section() {
        let analysis = analysis(Language::Bash);
        let pair = PromptBuilder::new(20_000)
            .generate(&GenerateInputs {
                analysis: &analysis,
                script_name: "run.sh",
                example_usage: None,
                baseline: None,
            })
            .expect("render");
        assert!(!pair.user.contains("revised Dockerfile"));
        assert!(!pair.user.contains("Example usage"));
        assert!(pair.user.contains("Bash notes:"));
    }

    /// Verifies only the failure context that exists reaches the refinement prompt.
    #[test]
    fn refine_prompt_includes_present_context_only() {
        let pair = PromptBuilder::new(20_000)
            .refine(&RefineInputs {
                current_spec: "FROM python:3.11-slim",
                build_error: Some("pip failed"),
                validation_error: None,
                build_log_tail: Some("step 3/5"),
            })
            .expect("render");
        assert!(pair.system.contains("IMPROVED_DOCKERFILE:"));
        assert!(pair.user.contains("BUILD ERROR:\npip failed"));
        assert!(pair.user.contains("BUILD LOGS (tail):\nstep 3/5"));
        assert!(!pair.user.contains("VALIDATION ERROR"));
    }

    #[test]
    fn blank_refine_context_is_omitted() {
        let pair = PromptBuilder::new(20_000)
            .refine(&RefineInputs {
                current_spec: "FROM python:3.11-slim",
                build_error: Some("   "),
                validation_error: Some("  Startup failed \n"),
                build_log_tail: Some(""),
            })
            .expect("render");
        assert!(!pair.user.contains("BUILD ERROR"));
        assert!(!pair.user.contains("BUILD LOGS"));
        assert!(pair.user.contains("VALIDATION ERROR:\nStartup failed"));
        assert_eq!(non_empty(Some(" x ")), Some("x"));
        assert_eq!(non_empty(Some("\n")), None);
        assert_eq!(non_empty(None), None);
    }

    /// Verifies build logs are dropped before the Dockerfile or errors.
    #[test]
    fn budget_drops_logs_first() {
        let logs = "x".repeat(5000);
        let pair = PromptBuilder::new(600)
            .refine(&RefineInputs {
                current_spec: "FROM python:3.11-slim",
                build_error: Some("pip failed"),
                validation_error: Some("Example Usage failed"),
                build_log_tail: Some(&logs),
            })
            .expect("render");
        assert!(!pair.user.contains("BUILD LOGS"));
        assert!(pair.user.contains("FROM python:3.11-slim"));
        assert!(pair.user.contains("pip failed"));
        assert!(pair.user.contains("Example Usage failed"));
    }

    #[test]
    fn oversized_source_is_truncated() {
        let content = "print('x')\n".repeat(180);
        let pair = PromptBuilder::new(500)
            .analyze(Language::Python, "app.py", &content, &[])
            .expect("render");
        assert!(pair.user.contains("[truncated]"));
        assert!(pair.user.len() < 520);
        assert!(pair.user.contains("Analyze this python script"));
    }

    #[test]
    fn log_tail_keeps_last_chars() {
        assert_eq!(log_tail("abcdef", 3), "def");
        assert_eq!(log_tail("abc", 10), "abc");
        assert_eq!(log_tail("ééé", 2), "éé");
    }
}
