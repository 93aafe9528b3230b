//! One function per workflow state.
//!
//! Each step consumes the prior [`RunState`] and returns the next one plus a
//! [`Signal`]; the interpreter in [`crate::looping`] resolves the transition.
//! [`complete`] runs exactly once, after the loop reaches `Complete`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::agents::AgentError;
use crate::agents::analyzer::AnalyzerAgent;
use crate::agents::generator::GeneratorAgent;
use crate::core::classifier::classify;
use crate::core::error::{GenerationErrorKind, WorkflowError};
use crate::core::sanitize::{check_script_extension, validate_example_usage};
use crate::core::transitions::Signal;
use crate::core::types::{BuildOutcome, RefinementOutcome, ScriptAnalysis, Step, ValidationVerdict};
use crate::io::generation::GenerationService;
use crate::io::output::{stage_script, write_build_spec};
use crate::io::prompt::GenerateInputs;
use crate::io::sandbox::Sandbox;
use crate::refine::{RefineStep, RefinementContext, RefinementController};
use crate::validate::{HarnessConfig, ValidationHarness, ValidationTarget};

/// Validated inputs of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub script_path: PathBuf,
    pub script_name: String,
    pub source: String,
    pub example_usage: Option<String>,
    pub output_dir: PathBuf,
}

impl RunRequest {
    /// Check and load the run inputs.
    pub fn load(script_path: &Path, example_usage: Option<&str>, output_dir: &Path) -> Result<Self> {
        if !script_path.is_file() {
            return Err(anyhow!("script not found: {}", script_path.display()));
        }
        check_script_extension(script_path)?;
        let example_usage = example_usage
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);
        if let Some(example) = &example_usage {
            validate_example_usage(example)?;
        }
        let source = fs::read_to_string(script_path)
            .with_context(|| format!("read script {}", script_path.display()))?;
        let script_name = script_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("script path has no file name {}", script_path.display()))?;
        Ok(Self {
            script_path: script_path.to_path_buf(),
            script_name,
            source,
            example_usage,
            output_dir: output_dir.to_path_buf(),
        })
    }
}

/// Everything one run accumulates. Owned by exactly one engine run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub request: RunRequest,
    pub step: Step,
    pub refinement_count: u32,
    pub max_refinements: u32,
    pub analysis: Option<ScriptAnalysis>,
    /// Current build-spec text.
    pub build_spec: Option<String>,
    pub build_spec_path: Option<PathBuf>,
    /// Latest build attempt.
    pub build: Option<BuildOutcome>,
    /// Verdict for the latest build; cleared when a new build starts.
    pub verdict: Option<ValidationVerdict>,
    pub last_refinement: Option<RefinementOutcome>,
    /// Artifacts of every successful build, oldest first.
    pub artifacts: Vec<String>,
    pub error: Option<WorkflowError>,
    pub completed: bool,
    pub success: bool,
    /// Append-only progress log.
    pub messages: Vec<String>,
}

impl RunState {
    pub fn new(request: RunRequest, max_refinements: u32) -> Self {
        Self {
            request,
            step: Step::Analyze,
            refinement_count: 0,
            max_refinements,
            analysis: None,
            build_spec: None,
            build_spec_path: None,
            build: None,
            verdict: None,
            last_refinement: None,
            artifacts: Vec::new(),
            error: None,
            completed: false,
            success: false,
            messages: Vec::new(),
        }
    }

    fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(step = %self.step, %message, "progress");
        self.messages.push(message);
    }

    fn fail(mut self, error: WorkflowError, signal: Signal) -> (Self, Signal) {
        warn!(step = %self.step, err = %error, "step failed");
        self.error = Some(error);
        (self, signal)
    }
}

/// Borrowed collaborators shared by every step.
#[derive(Debug)]
pub struct StepContext<'a, G, S> {
    pub service: &'a G,
    pub sandbox: &'a S,
    pub analyzer: &'a AnalyzerAgent,
    pub generator: &'a GeneratorAgent,
    pub refiner: &'a RefinementController,
    pub harness: &'a HarnessConfig,
}

/// Dispatch to the step function for `state.step`.
pub async fn run_step<G, S>(ctx: &StepContext<'_, G, S>, state: RunState) -> (RunState, Signal)
where
    G: GenerationService + Sync,
    S: Sandbox + Sync,
{
    match state.step {
        Step::Analyze => analyze(ctx, state).await,
        Step::Generate => generate(ctx, state).await,
        Step::Build => build(ctx, state).await,
        Step::Validate => validate(ctx, state).await,
        Step::Refine => refine(ctx, state).await,
        Step::Complete => (state, Signal::Fatal),
    }
}

/// Map an agent failure to a terminal error and signal.
///
/// Fatal classes short-circuit with their fixed message; everything else is
/// reported through `recoverable`.
fn agent_failure(
    err: AgentError,
    recoverable: impl FnOnce(GenerationErrorKind, String) -> WorkflowError,
) -> (WorkflowError, Signal) {
    match err {
        AgentError::Generation(gen_err) => match classify(&gen_err).fatal_message() {
            Some(message) => (
                WorkflowError::Generation {
                    kind: gen_err.kind,
                    message: message.to_string(),
                },
                Signal::Fatal,
            ),
            None => (
                recoverable(gen_err.kind, gen_err.to_string()),
                Signal::Failed,
            ),
        },
        other => (
            recoverable(GenerationErrorKind::Unknown, other.to_string()),
            Signal::Failed,
        ),
    }
}

#[instrument(skip_all)]
async fn analyze<G, S>(ctx: &StepContext<'_, G, S>, mut state: RunState) -> (RunState, Signal)
where
    G: GenerationService + Sync,
{
    state.note("Analyzing script...");
    let result = ctx
        .analyzer
        .analyze(ctx.service, &state.request.script_path, &state.request.source)
        .await;
    match result {
        Ok(analysis) => {
            state.note(format!(
                "Analysis complete: {} script, {} dependencies",
                analysis.language,
                analysis.dependencies.len()
            ));
            state.analysis = Some(analysis);
            (state, Signal::Succeeded)
        }
        Err(err) => {
            let (error, signal) = agent_failure(err, |_, message| WorkflowError::Analysis(message));
            state.fail(error, signal)
        }
    }
}

#[instrument(skip_all, fields(refinement_count = state.refinement_count))]
async fn generate<G, S>(ctx: &StepContext<'_, G, S>, mut state: RunState) -> (RunState, Signal)
where
    G: GenerationService + Sync,
{
    let Some(analysis) = state.analysis.clone() else {
        return state.fail(
            WorkflowError::Unexpected("generation started without an analysis".to_string()),
            Signal::Fatal,
        );
    };
    state.note("Generating Dockerfile...");
    let inputs = GenerateInputs {
        analysis: &analysis,
        script_name: &state.request.script_name,
        example_usage: state.request.example_usage.as_deref(),
        baseline: state.last_refinement.as_ref().map(|r| r.build_spec.as_str()),
    };
    let spec = match ctx.generator.generate(ctx.service, &inputs).await {
        Ok(spec) => spec,
        Err(err) => {
            let (error, signal) = agent_failure(err, |kind, message| WorkflowError::Generation {
                kind,
                message: format!("Dockerfile generation failed: {message}"),
            });
            return state.fail(error, signal);
        }
    };

    let written = write_build_spec(&state.request.output_dir, &spec).and_then(|path| {
        stage_script(&state.request.output_dir, &state.request.script_path)?;
        Ok(path)
    });
    match written {
        Ok(path) => {
            state.note(format!("Dockerfile written to {}", path.display()));
            state.build_spec = Some(spec);
            state.build_spec_path = Some(path);
            (state, Signal::Succeeded)
        }
        Err(err) => state.fail(
            WorkflowError::Unexpected(format!("failed to write build spec: {err:#}")),
            Signal::Fatal,
        ),
    }
}

#[instrument(skip_all, fields(refinement_count = state.refinement_count))]
async fn build<G, S>(ctx: &StepContext<'_, G, S>, mut state: RunState) -> (RunState, Signal)
where
    S: Sandbox + Sync,
{
    let Some(spec_path) = state.build_spec_path.clone() else {
        return state.fail(
            WorkflowError::Unexpected("build started without a build spec".to_string()),
            Signal::Fatal,
        );
    };
    state.note("Building Docker image...");
    state.verdict = None;
    let result = ctx
        .sandbox
        .build(
            &spec_path,
            &state.request.output_dir,
            &state.request.script_path,
        )
        .await;
    match result {
        Ok(outcome) if outcome.success => {
            state.note(format!(
                "Image built: {} ({:.1}s)",
                outcome.artifact_id, outcome.duration_secs
            ));
            state.artifacts.push(outcome.artifact_id.clone());
            state.build = Some(outcome);
            (state, Signal::Succeeded)
        }
        Ok(outcome) => {
            let reason = outcome
                .error
                .clone()
                .unwrap_or_else(|| "Build failed without specific error".to_string());
            state.note(format!("Build failed: {reason}"));
            state.build = Some(outcome);
            (state, Signal::Failed)
        }
        Err(err) => state.fail(
            WorkflowError::Build(format!("Docker build failed: {err}")),
            Signal::Fatal,
        ),
    }
}

#[instrument(skip_all)]
async fn validate<G, S>(ctx: &StepContext<'_, G, S>, mut state: RunState) -> (RunState, Signal)
where
    S: Sandbox + Sync,
{
    let Some(artifact_id) = state
        .build
        .as_ref()
        .filter(|b| b.success)
        .map(|b| b.artifact_id.clone())
    else {
        state.verdict = Some(ValidationVerdict::aborted(Vec::new(), "no built artifact"));
        return (state, Signal::Failed);
    };
    state.note("Validating container...");
    let harness = ValidationHarness::new(ctx.sandbox, ctx.harness.clone());
    let target = ValidationTarget {
        artifact_id: &artifact_id,
        script_name: &state.request.script_name,
        source: &state.request.source,
        example_usage: state.request.example_usage.as_deref(),
    };
    let verdict = harness.validate(&target).await;
    let signal = if verdict.passed {
        state.note("Validation passed");
        Signal::Succeeded
    } else {
        let reason = verdict
            .error
            .clone()
            .unwrap_or_else(|| "Validation failed without specific error".to_string());
        state.note(reason);
        Signal::Failed
    };
    state.verdict = Some(verdict);
    (state, signal)
}

#[instrument(skip_all, fields(refinement_count = state.refinement_count))]
async fn refine<G, S>(ctx: &StepContext<'_, G, S>, mut state: RunState) -> (RunState, Signal)
where
    G: GenerationService + Sync,
{
    let current_spec = state.build_spec.clone().unwrap_or_default();
    let validation_error = state.verdict.as_ref().and_then(|v| v.error.clone());
    let refine_ctx = RefinementContext {
        current_spec: &current_spec,
        build: state.build.as_ref(),
        validation_error: validation_error.as_deref(),
        analysis: state.analysis.as_ref(),
        script_name: &state.request.script_name,
    };
    let result = ctx
        .refiner
        .refine(ctx.service, state.refinement_count, &refine_ctx)
        .await;
    match result {
        Ok(RefineStep::Revised(outcome)) => {
            state.refinement_count += 1;
            state.note(format!(
                "Dockerfile refined (attempt {}): {}",
                state.refinement_count, outcome.changes
            ));
            state.build_spec = Some(outcome.build_spec.clone());
            state.last_refinement = Some(outcome);
            (state, Signal::Succeeded)
        }
        Ok(RefineStep::Exhausted) => {
            let last = last_failure(&state)
                .unwrap_or_else(|| "no successful build or validation".to_string());
            let max = state.max_refinements;
            state.fail(WorkflowError::RefinementExhausted { max, last }, Signal::Exhausted)
        }
        Err(err) => {
            let (error, signal) = agent_failure(err, |kind, message| WorkflowError::Generation {
                kind,
                message: format!("Refinement failed: {message}"),
            });
            state.fail(error, signal)
        }
    }
}

/// Text of the latest failing sub-result: build error, else validation error.
fn last_failure(state: &RunState) -> Option<String> {
    if let Some(build) = state.build.as_ref().filter(|b| !b.success) {
        return Some(
            build
                .error
                .clone()
                .unwrap_or_else(|| "Build failed without specific error".to_string()),
        );
    }
    if let Some(verdict) = state.verdict.as_ref().filter(|v| !v.passed) {
        return Some(
            verdict
                .error
                .clone()
                .unwrap_or_else(|| "Validation failed without specific error".to_string()),
        );
    }
    None
}

/// Stop a run that was cancelled while `state.step` was pending. The
/// interrupted step's partial work is discarded; the run then completes.
pub fn interrupt(mut state: RunState) -> RunState {
    let step = state.step.to_string();
    state.note(format!("Interrupted during {step}"));
    let (state, _) = state.fail(WorkflowError::Interrupted(step), Signal::Fatal);
    state
}

/// Enter `Complete`: set the success flag and make sure a failed run always
/// carries a terminal error.
pub fn complete(mut state: RunState) -> RunState {
    state.step = Step::Complete;
    state.completed = true;
    let validated = state.verdict.as_ref().is_some_and(|v| v.passed)
        && state.build.as_ref().is_some_and(|b| b.success);
    state.success = validated && state.error.is_none();

    if !state.success && state.error.is_none() {
        let error = match last_failure(&state) {
            Some(last) if state.refinement_count >= state.max_refinements => {
                WorkflowError::RefinementExhausted {
                    max: state.max_refinements,
                    last,
                }
            }
            Some(last) if state.build.as_ref().is_some_and(|b| !b.success) => {
                WorkflowError::Build(last)
            }
            Some(last) => WorkflowError::Validation(last),
            None => WorkflowError::Unexpected("Workflow failed for unknown reasons".to_string()),
        };
        state.error = Some(error);
    }

    match &state.error {
        None => state.note("Workflow completed successfully"),
        Some(error) => {
            let message = format!("Workflow completed with errors: {error}");
            state.note(message);
        }
    }
    info!(
        success = state.success,
        refinement_count = state.refinement_count,
        "workflow complete"
    );
    state
}
