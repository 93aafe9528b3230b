//! Validation harness: a fixed, ordered probe suite run against a built artifact.
//!
//! Probes run sequentially. Every sandbox call goes through a retry wrapper
//! that only retries the "instance removed underneath us" race.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::behavior::infer_cases;
use crate::core::error::SandboxError;
use crate::core::types::{ProbeKind, ProbeResult, RunOutcome, ValidationVerdict};
use crate::core::usage::parse_example_usage;
use crate::io::config::GeneratorConfig;
use crate::io::sandbox::Sandbox;

const HELP_FLAGS: &[&str] = &["--help", "-h", "help"];
const HELP_KEYWORDS: &[&str] = &["usage", "help", "options", "arguments"];
const INVALID_FLAG: &str = "--invalid-flag-that-should-not-exist";

/// Probe timeouts and race-retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub startup_timeout: Duration,
    pub help_timeout: Duration,
    pub example_timeout: Duration,
    pub error_timeout: Duration,
    pub behavior_timeout: Duration,
    /// Extra attempts after a removal race.
    pub race_retries: u32,
    pub race_backoff: Duration,
}

impl HarnessConfig {
    pub fn from_config(cfg: &GeneratorConfig) -> Self {
        let secs = Duration::from_secs;
        Self {
            startup_timeout: secs(cfg.probes.startup_timeout_secs),
            help_timeout: secs(cfg.probes.help_timeout_secs),
            example_timeout: secs(cfg.probes.example_timeout_secs),
            error_timeout: secs(cfg.probes.error_timeout_secs),
            behavior_timeout: secs(cfg.probes.behavior_timeout_secs),
            race_retries: cfg.sandbox.race_retries,
            race_backoff: Duration::from_millis(cfg.sandbox.race_backoff_ms),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::from_config(&GeneratorConfig::default())
    }
}

/// What the harness needs to know about the artifact under test.
#[derive(Debug, Clone, Copy)]
pub struct ValidationTarget<'a> {
    pub artifact_id: &'a str,
    pub script_name: &'a str,
    /// Script source, used to infer behavior cases.
    pub source: &'a str,
    pub example_usage: Option<&'a str>,
}

#[derive(Debug)]
pub struct ValidationHarness<S> {
    sandbox: S,
    config: HarnessConfig,
    env: BTreeMap<String, String>,
}

impl<S: Sandbox> ValidationHarness<S> {
    pub fn new(sandbox: S, config: HarnessConfig) -> Self {
        Self {
            sandbox,
            config,
            env: BTreeMap::new(),
        }
    }

    /// Run the full suite and aggregate the verdict.
    #[instrument(skip_all, fields(artifact = target.artifact_id))]
    pub async fn validate(&self, target: &ValidationTarget<'_>) -> ValidationVerdict {
        let mut probes = vec![
            self.probe_startup(target).await,
            self.probe_help(target).await,
        ];
        if let Some(example) = target.example_usage.filter(|e| !e.trim().is_empty()) {
            probes.push(self.probe_example(target, example).await);
        }
        probes.push(self.probe_error_handling(target).await);
        probes.push(self.probe_behavior(target).await);

        for probe in &probes {
            debug!(probe = probe.name(), passed = probe.passed, "probe finished");
        }
        let verdict = ValidationVerdict::from_probes(probes);
        info!(passed = verdict.passed, "validation finished");
        verdict
    }

    /// Run the artifact, retrying only the removal race.
    async fn run(
        &self,
        target: &ValidationTarget<'_>,
        args: &[String],
        timeout: Duration,
    ) -> Result<RunOutcome, SandboxError> {
        let mut attempt = 0;
        loop {
            match self
                .sandbox
                .run(target.artifact_id, args, timeout, &self.env)
                .await
            {
                Err(err) if err.is_target_removed() && attempt < self.config.race_retries => {
                    attempt += 1;
                    warn!(attempt, err = %err, "sandbox instance removed, retrying");
                    tokio::time::sleep(self.config.race_backoff).await;
                }
                result => return result,
            }
        }
    }

    async fn probe_startup(&self, target: &ValidationTarget<'_>) -> ProbeResult {
        const EXPECTED: &str = "Container starts without immediate crash";
        match self.run(target, &[], self.config.startup_timeout).await {
            Ok(outcome) => ProbeResult::pass(ProbeKind::Startup, outcome.output, EXPECTED),
            Err(err) => ProbeResult::fail(ProbeKind::Startup, "", EXPECTED, Some(err.to_string())),
        }
    }

    async fn probe_help(&self, target: &ValidationTarget<'_>) -> ProbeResult {
        const EXPECTED: &str = "Usage information displayed";
        const OPTIONAL: &str = "Optional: Usage information displayed";
        let mut last_error = None;
        for flag in HELP_FLAGS {
            let args = [(*flag).to_string()];
            match self.run(target, &args, self.config.help_timeout).await {
                Ok(outcome) => {
                    let lower = outcome.output.to_lowercase();
                    if HELP_KEYWORDS.iter().any(|k| lower.contains(k)) {
                        return ProbeResult::pass(ProbeKind::Help, outcome.output, EXPECTED);
                    }
                }
                Err(err) => {
                    debug!(flag = *flag, err = %err, "help flag could not run");
                    last_error = Some(err.to_string());
                }
            }
        }
        ProbeResult {
            error: last_error,
            ..ProbeResult::pass(ProbeKind::Help, "No help output found (acceptable)", OPTIONAL)
        }
    }

    async fn probe_example(&self, target: &ValidationTarget<'_>, example: &str) -> ProbeResult {
        const EXPECTED: &str = "Example usage executes successfully";
        let args = parse_example_usage(example, Some(target.script_name));
        debug!(?args, "example usage arguments");

        if !args.is_empty() {
            match self.run(target, &args, self.config.example_timeout).await {
                Ok(outcome) if outcome.success => {
                    return ProbeResult::pass(ProbeKind::ExampleUsage, outcome.output, EXPECTED);
                }
                Ok(outcome) => debug!(exit_code = ?outcome.exit_code, "example usage failed"),
                Err(err) => debug!(err = %err, "example usage could not run"),
            }
        }

        // Fall back to a default run; a clean default execution is accepted.
        match self.run(target, &[], self.config.example_timeout).await {
            Ok(outcome) if outcome.success => ProbeResult::pass(
                ProbeKind::ExampleUsage,
                format!("Default execution successful: {}", outcome.output),
                EXPECTED,
            ),
            Ok(outcome) => {
                let error = outcome
                    .error
                    .or_else(|| Some(format!("exit code {:?}", outcome.exit_code)));
                ProbeResult::fail(ProbeKind::ExampleUsage, outcome.output, EXPECTED, error)
            }
            Err(err) => {
                ProbeResult::fail(ProbeKind::ExampleUsage, "", EXPECTED, Some(err.to_string()))
            }
        }
    }

    async fn probe_error_handling(&self, target: &ValidationTarget<'_>) -> ProbeResult {
        const EXPECTED: &str = "Graceful error handling";
        let args = [INVALID_FLAG.to_string()];
        match self.run(target, &args, self.config.error_timeout).await {
            Ok(outcome) if outcome.success => ProbeResult::pass(
                ProbeKind::ErrorHandling,
                outcome.output,
                "Graceful error handling (or ignores invalid flags)",
            ),
            Ok(outcome) if !outcome.output.trim().is_empty() => {
                ProbeResult::pass(ProbeKind::ErrorHandling, outcome.output, EXPECTED)
            }
            Ok(outcome) => ProbeResult::fail(
                ProbeKind::ErrorHandling,
                outcome.output,
                EXPECTED,
                Some("Container crashed or no error output".to_string()),
            ),
            Err(err) => ProbeResult {
                error: Some(err.to_string()),
                ..ProbeResult::pass(ProbeKind::ErrorHandling, "", EXPECTED)
            },
        }
    }

    async fn probe_behavior(&self, target: &ValidationTarget<'_>) -> ProbeResult {
        const EXPECTED: &str = "Script behavior matches expectations";
        let cases = infer_cases(target.source);
        if cases.is_empty() {
            return ProbeResult::pass(
                ProbeKind::ExpectedBehavior,
                "No specific test cases inferred",
                EXPECTED,
            );
        }
        for case in cases {
            let args = [case.argument.clone()];
            match self.run(target, &args, self.config.behavior_timeout).await {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => {
                    return ProbeResult::fail(
                        ProbeKind::ExpectedBehavior,
                        outcome.output,
                        case.expected,
                        outcome.error,
                    );
                }
                Err(err) => {
                    return ProbeResult::fail(
                        ProbeKind::ExpectedBehavior,
                        "",
                        case.expected,
                        Some(err.to_string()),
                    );
                }
            }
        }
        ProbeResult::pass(
            ProbeKind::ExpectedBehavior,
            "All inferred test cases passed",
            EXPECTED,
        )
    }
}
