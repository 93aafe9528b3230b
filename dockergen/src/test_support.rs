//! Test-only scripted collaborators for the generation service and the sandbox.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::core::error::{GenerationError, GenerationErrorKind, SandboxError, SandboxErrorKind};
use crate::core::types::{BuildOutcome, RunOutcome};
use crate::io::generation::{GenerationRequest, GenerationResponse, GenerationService};
use crate::io::sandbox::Sandbox;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Generation service answering from a queue, then from an optional repeated answer.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    queue: Mutex<VecDeque<Result<GenerationResponse, GenerationError>>>,
    repeat: Option<GenerationResponse>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with `content` and the given usage.
    pub fn repeating(content: &str, prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            repeat: Some(response(content, prompt_tokens, completion_tokens)),
            ..Self::default()
        }
    }

    /// Queue a successful answer (100 prompt / 50 completion tokens).
    pub fn respond(self, content: &str) -> Self {
        lock(&self.queue).push_back(Ok(response(content, 100, 50)));
        self
    }

    /// Queue a failure.
    pub fn fail(self, err: GenerationError) -> Self {
        lock(&self.queue).push_back(Err(err));
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    /// Purpose labels of the calls so far, in order.
    pub fn purposes(&self) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .map(|r| r.purpose.clone())
            .collect()
    }

    /// Queued answers not consumed yet.
    pub fn remaining(&self) -> usize {
        lock(&self.queue).len()
    }
}

fn response(content: &str, prompt_tokens: u32, completion_tokens: u32) -> GenerationResponse {
    GenerationResponse {
        content: content.to_string(),
        prompt_tokens,
        completion_tokens,
        model: String::new(),
    }
}

impl GenerationService for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        lock(&self.requests).push(request.clone());
        let next = lock(&self.queue).pop_front();
        let mut answer = match (next, &self.repeat) {
            (Some(answer), _) => answer,
            (None, Some(repeat)) => Ok(repeat.clone()),
            (None, None) => Err(GenerationError::new(
                GenerationErrorKind::Unknown,
                "scripted generator has no answer left",
            )),
        };
        if let Ok(resp) = &mut answer
            && resp.model.is_empty()
        {
            resp.model = request.model.clone().unwrap_or_default();
        }
        answer
    }
}

type RunHandler = Box<dyn Fn(&[String]) -> Result<RunOutcome, SandboxError> + Send + Sync>;

/// One recorded `run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRun {
    pub artifact_id: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// Sandbox with scripted build results and a run handler.
///
/// Builds succeed unless a failure is queued or `always_fail_builds` is set.
/// Queued run results are consumed before the handler is consulted; the
/// default handler exits 0 with output `ok`.
pub struct ScriptedSandbox {
    builds: Mutex<VecDeque<Result<BuildOutcome, SandboxError>>>,
    build_failure: Option<String>,
    queued_runs: Mutex<VecDeque<Result<RunOutcome, SandboxError>>>,
    handler: RunHandler,
    built_specs: Mutex<Vec<String>>,
    runs: Mutex<Vec<RecordedRun>>,
    removed: Mutex<Vec<String>>,
}

impl Default for ScriptedSandbox {
    fn default() -> Self {
        Self {
            builds: Mutex::new(VecDeque::new()),
            build_failure: None,
            queued_runs: Mutex::new(VecDeque::new()),
            handler: Box::new(|_| Ok(run_ok("ok"))),
            built_specs: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }
}

impl std::fmt::Debug for ScriptedSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSandbox")
            .field("builds", &lock(&self.built_specs).len())
            .field("runs", &lock(&self.runs).len())
            .finish_non_exhaustive()
    }
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one failed build.
    pub fn fail_build(self, error: &str) -> Self {
        lock(&self.builds).push_back(Ok(build_outcome(0, Some(error))));
        self
    }

    /// Every build without a queued result fails with `error`.
    pub fn always_fail_builds(mut self, error: &str) -> Self {
        self.build_failure = Some(error.to_string());
        self
    }

    /// Queue one result for the next `run` call.
    pub fn queue_run(self, result: Result<RunOutcome, SandboxError>) -> Self {
        lock(&self.queued_runs).push_back(result);
        self
    }

    pub fn with_handler(
        mut self,
        handler: impl Fn(&[String]) -> Result<RunOutcome, SandboxError> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn builds(&self) -> usize {
        lock(&self.built_specs).len()
    }

    /// Build-spec text seen by each build, in order.
    pub fn built_specs(&self) -> Vec<String> {
        lock(&self.built_specs).clone()
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        lock(&self.runs).clone()
    }

    pub fn removed(&self) -> Vec<String> {
        lock(&self.removed).clone()
    }
}

fn build_outcome(n: usize, error: Option<&str>) -> BuildOutcome {
    BuildOutcome {
        success: error.is_none(),
        artifact_id: format!("scripted-image-{n}"),
        logs: error.map_or_else(|| "built".to_string(), |e| format!("ERROR: {e}")),
        error: error.map(str::to_string),
        duration_secs: 0.0,
    }
}

/// Successful run with exit code 0.
pub fn run_ok(output: &str) -> RunOutcome {
    RunOutcome {
        success: true,
        exit_code: Some(0),
        output: output.to_string(),
        error: None,
        timed_out: false,
    }
}

/// Run that exited with `code`.
pub fn run_failed(code: i32, output: &str) -> RunOutcome {
    RunOutcome {
        success: false,
        exit_code: Some(code),
        output: output.to_string(),
        error: Some(if output.is_empty() {
            format!("Container exited with status Some({code})")
        } else {
            output.to_string()
        }),
        timed_out: false,
    }
}

/// The "instance removed underneath us" race.
pub fn removal_race() -> SandboxError {
    SandboxError::new(
        SandboxErrorKind::TargetRemoved,
        "container is marked for removal and cannot be started",
    )
}

impl Sandbox for ScriptedSandbox {
    async fn build(
        &self,
        spec_path: &Path,
        _context_dir: &Path,
        _primary_file: &Path,
    ) -> Result<BuildOutcome, SandboxError> {
        let spec = fs::read_to_string(spec_path)
            .map_err(|e| SandboxError::new(SandboxErrorKind::Io, e.to_string()))?;
        let n = {
            let mut specs = lock(&self.built_specs);
            specs.push(spec);
            specs.len() - 1
        };
        if let Some(queued) = lock(&self.builds).pop_front() {
            return queued.map(|outcome| BuildOutcome {
                artifact_id: format!("scripted-image-{n}"),
                ..outcome
            });
        }
        Ok(build_outcome(n, self.build_failure.as_deref()))
    }

    async fn run(
        &self,
        artifact_id: &str,
        args: &[String],
        timeout: Duration,
        _env: &BTreeMap<String, String>,
    ) -> Result<RunOutcome, SandboxError> {
        lock(&self.runs).push(RecordedRun {
            artifact_id: artifact_id.to_string(),
            args: args.to_vec(),
            timeout,
        });
        if let Some(queued) = lock(&self.queued_runs).pop_front() {
            return queued;
        }
        (self.handler)(args)
    }

    async fn remove(&self, artifact_id: &str) -> Result<(), SandboxError> {
        lock(&self.removed).push(artifact_id.to_string());
        Ok(())
    }
}
