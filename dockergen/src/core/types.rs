//! Shared deterministic types for the workflow core.
//!
//! These types define stable contracts between the engine, the validation
//! harness and the collaborator adapters. They carry no I/O handles and are
//! immutable once produced; a retry produces a new value instead of mutating
//! the old one.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Workflow state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Analyze,
    Generate,
    Build,
    Validate,
    Refine,
    /// Terminal and absorbing.
    Complete,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Analyze => "analyze",
            Step::Generate => "generate",
            Step::Build => "build",
            Step::Validate => "validate",
            Step::Refine => "refine",
            Step::Complete => "complete",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source languages the generator knows how to containerize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Bash,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Bash => "bash",
        }
    }

    pub fn default_base_image(self) -> &'static str {
        match self {
            Language::Python => "python:3.11-slim",
            Language::JavaScript => "node:18-alpine",
            Language::Bash => "ubuntu:22.04",
        }
    }

    pub fn interpreter(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "node",
            Language::Bash => "bash",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime requirements derived from the source script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptAnalysis {
    pub language: Language,
    pub runtime_version: Option<String>,
    /// Third-party modules/packages referenced by the script (sorted, deduplicated).
    pub dependencies: Vec<String>,
    pub base_image: String,
    /// Command that runs the script inside the artifact, e.g. `python app.py`.
    pub entry_command: String,
    pub additional_packages: Vec<String>,
    pub environment_vars: BTreeMap<String, String>,
}

/// Result of one build attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub success: bool,
    /// Image tag of the artifact (set even when the build failed).
    pub artifact_id: String,
    pub logs: String,
    pub error: Option<String>,
    pub duration_secs: f64,
}

/// Result of one sandbox invocation that launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// `true` iff the instance exited with status 0 before its timeout.
    pub success: bool,
    /// `None` when the instance was killed on timeout.
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr of the instance.
    pub output: String,
    pub error: Option<String>,
    pub timed_out: bool,
}

/// The fixed probes of the validation harness, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Startup,
    Help,
    ExampleUsage,
    ErrorHandling,
    ExpectedBehavior,
}

impl ProbeKind {
    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::Startup => "Container Startup",
            ProbeKind::Help => "Help Output",
            ProbeKind::ExampleUsage => "Example Usage",
            ProbeKind::ErrorHandling => "Error Handling",
            ProbeKind::ExpectedBehavior => "Expected Behavior",
        }
    }

    /// Critical probes decide the verdict; the rest are informational.
    pub fn is_critical(self) -> bool {
        matches!(self, ProbeKind::Startup | ProbeKind::ExampleUsage)
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe: ProbeKind,
    pub passed: bool,
    pub output: String,
    /// Human-readable description of the behavior the probe expects.
    pub expected: String,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn pass(probe: ProbeKind, output: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            probe,
            passed: true,
            output: output.into(),
            expected: expected.into(),
            error: None,
        }
    }

    pub fn fail(
        probe: ProbeKind,
        output: impl Into<String>,
        expected: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            probe,
            passed: false,
            output: output.into(),
            expected: expected.into(),
            error,
        }
    }

    pub fn name(&self) -> &'static str {
        self.probe.name()
    }
}

/// Aggregated result of a probe suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub passed: bool,
    /// Probe results in execution order.
    pub probes: Vec<ProbeResult>,
    pub error: Option<String>,
}

/// Structured answer of one refinement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub build_spec: String,
    pub changes: String,
    pub rationale: String,
    /// Set when the response could not be parsed and the minimal spec was used.
    pub fallback: bool,
}
