//! Workflow interpreter: drives [`crate::step`] functions through the
//! transition table until `Complete`, then persists the run summary.

use std::future::{self, Future};
use std::path::PathBuf;
use std::pin::pin;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::AgentSettings;
use crate::agents::analyzer::AnalyzerAgent;
use crate::agents::generator::GeneratorAgent;
use crate::agents::refiner::RefinerAgent;
use crate::core::budget::{BudgetLedger, Cost};
use crate::core::error::ErrorTag;
use crate::core::transitions::next_step;
use crate::core::types::{ProbeResult, ScriptAnalysis, Step};
use crate::io::config::GeneratorConfig;
use crate::io::generation::{GenerationService, MeteredGenerator};
use crate::io::output::{RUN_SUMMARY_FILE, write_cost_report, write_json};
use crate::io::sandbox::Sandbox;
use crate::refine::RefinementController;
use crate::step::{RunRequest, RunState, StepContext, complete, interrupt, run_step};
use crate::validate::HarnessConfig;

/// Public result of a run, also written as `run_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub refinement_count: u32,
    pub max_refinements: u32,
    pub dockerfile_path: Option<PathBuf>,
    /// Kept image, if any.
    pub artifact_id: Option<String>,
    pub analysis: Option<ScriptAnalysis>,
    pub probes: Vec<ProbeResult>,
    pub last_changes: Option<String>,
    pub total_cost_usd: f64,
    pub budget_usd: f64,
    pub error: Option<String>,
    pub error_kind: Option<ErrorTag>,
    pub messages: Vec<String>,
}

/// Outcome of [`Workflow::run`]: the summary plus the final ledger.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub summary: RunSummary,
    pub ledger: BudgetLedger,
}

/// Per-run options that are not part of the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub budget: Cost,
    /// Keep the validated image instead of removing it at the end.
    pub keep_image: bool,
}

/// Collaborators and settings for one generator run.
#[derive(Debug)]
pub struct Workflow<G, S> {
    service: MeteredGenerator<G>,
    sandbox: S,
    analyzer: AnalyzerAgent,
    generator: GeneratorAgent,
    refiner: RefinementController,
    harness: HarnessConfig,
    keep_image: bool,
}

impl<G, S> Workflow<G, S>
where
    G: GenerationService + Sync,
    S: Sandbox + Sync,
{
    pub fn new(service: G, sandbox: S, config: &GeneratorConfig, options: &RunOptions) -> Self {
        let settings = |max_tokens| AgentSettings {
            model: Some(config.model.clone()),
            temperature: config.temperature,
            max_tokens,
            prompt_budget_bytes: config.generation.prompt_budget_bytes,
        };
        Self {
            service: MeteredGenerator::new(service, config.model.clone(), options.budget),
            sandbox,
            analyzer: AnalyzerAgent::new(settings(config.generation.analyze_max_tokens)),
            generator: GeneratorAgent::new(settings(config.generation.generate_max_tokens)),
            refiner: RefinementController::new(
                RefinerAgent::new(settings(config.generation.refine_max_tokens)),
                config.max_refinements,
                config.build_log_tail_chars,
            ),
            harness: HarnessConfig::from_config(config),
            keep_image: options.keep_image,
        }
    }

    /// Run the state machine to completion.
    ///
    /// `on_progress` sees every progress message as it is produced. The run
    /// always completes; failures are reported in the summary.
    pub async fn run<F: FnMut(&str)>(&self, request: RunRequest, on_progress: F) -> WorkflowRun {
        self.run_until(request, future::pending(), on_progress).await
    }

    /// Like [`Workflow::run`], but stops early once `cancel` resolves.
    ///
    /// A cancelled run still completes: built images are released and both
    /// reports are written, with an `interrupted` error in the summary.
    #[instrument(skip_all, fields(script = %request.script_path.display()))]
    pub async fn run_until<C, F>(&self, request: RunRequest, cancel: C, mut on_progress: F) -> WorkflowRun
    where
        C: Future<Output = ()>,
        F: FnMut(&str),
    {
        let ctx = StepContext {
            service: &self.service,
            sandbox: &self.sandbox,
            analyzer: &self.analyzer,
            generator: &self.generator,
            refiner: &self.refiner,
            harness: &self.harness,
        };
        let mut cancel = pin!(cancel);
        let mut state = RunState::new(request, self.refiner.max_refinements());
        let mut reported = 0;

        while state.step != Step::Complete {
            let from = state.step;
            let before = state.clone();
            let stepped = tokio::select! {
                biased;
                () = &mut cancel => None,
                stepped = run_step(&ctx, state) => Some(stepped),
            };
            let Some((next, signal)) = stepped else {
                warn!(step = %from, "run cancelled");
                state = interrupt(before);
                break;
            };
            state = next;
            let to = next_step(from, signal, state.refinement_count, state.max_refinements);
            debug!(%from, ?signal, %to, refinement_count = state.refinement_count, "transition");
            state.step = to;
            reported = report(&state.messages, reported, &mut on_progress);
        }
        let mut state = complete(state);

        let kept = self.release_artifacts(&state).await;
        let ledger = self.service.ledger();
        if ledger.is_exceeded() {
            warn!(spent = %ledger.total_spent(), limit = %ledger.limit(), "reported usage exceeded the budget");
            state
                .messages
                .push(format!("Budget exceeded: {} spent of {}", ledger.total_spent(), ledger.limit()));
        }
        state.messages.push(ledger.to_string());
        report(&state.messages, reported, &mut on_progress);

        let summary = summarize(&state, &ledger, kept);
        persist(&state, &summary, &ledger);
        WorkflowRun { summary, ledger }
    }

    /// Remove built images. The validated image survives when `keep_image` is set.
    async fn release_artifacts(&self, state: &RunState) -> Option<String> {
        let keep = if self.keep_image && state.success {
            state.artifacts.last().cloned()
        } else {
            None
        };
        for artifact in &state.artifacts {
            if Some(artifact) == keep.as_ref() {
                continue;
            }
            if let Err(err) = self.sandbox.remove(artifact).await {
                warn!(artifact = %artifact, err = %err, "failed to remove image");
            }
        }
        keep
    }
}

fn report<F: FnMut(&str)>(messages: &[String], from: usize, on_progress: &mut F) -> usize {
    for message in &messages[from..] {
        on_progress(message);
    }
    messages.len()
}

fn summarize(state: &RunState, ledger: &BudgetLedger, kept: Option<String>) -> RunSummary {
    RunSummary {
        success: state.success,
        refinement_count: state.refinement_count,
        max_refinements: state.max_refinements,
        dockerfile_path: state.build_spec_path.clone(),
        artifact_id: kept,
        analysis: state.analysis.clone(),
        probes: state
            .verdict
            .as_ref()
            .map(|v| v.probes.clone())
            .unwrap_or_default(),
        last_changes: state.last_refinement.as_ref().map(|r| r.changes.clone()),
        total_cost_usd: ledger.total_spent().as_usd(),
        budget_usd: ledger.limit().as_usd(),
        error: state.error.as_ref().map(ToString::to_string),
        error_kind: state.error.as_ref().map(|e| e.kind()),
        messages: state.messages.clone(),
    }
}

/// Write `run_summary.json` and `costs.json`. Failures are logged only; the
/// summary is still returned to the caller.
fn persist(state: &RunState, summary: &RunSummary, ledger: &BudgetLedger) {
    let dir = &state.request.output_dir;
    if let Err(err) = write_json(&dir.join(RUN_SUMMARY_FILE), summary) {
        warn!(err = %format!("{err:#}"), "failed to write run summary");
    }
    match write_cost_report(dir, ledger) {
        Ok(path) => info!(path = %path.display(), "cost report written"),
        Err(err) => warn!(err = %format!("{err:#}"), "failed to write cost report"),
    }
}
