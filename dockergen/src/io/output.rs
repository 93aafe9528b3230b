//! Persisted run output: build spec, script copy, summary and cost report.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::core::budget::{BudgetLedger, CostRecord};

pub const BUILD_SPEC_FILE: &str = "Dockerfile";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";
pub const COSTS_FILE: &str = "costs.json";

/// Write the current build spec as `<dir>/Dockerfile`, replacing earlier attempts.
pub fn write_build_spec(output_dir: &Path, spec: &str) -> Result<PathBuf> {
    let path = output_dir.join(BUILD_SPEC_FILE);
    write_atomic(&path, spec.as_bytes())?;
    debug!(path = %path.display(), bytes = spec.len(), "wrote build spec");
    Ok(path)
}

/// Copy the source script next to the build spec so it is part of the build context.
pub fn stage_script(output_dir: &Path, script_path: &Path) -> Result<PathBuf> {
    let name = script_path
        .file_name()
        .with_context(|| format!("script path has no file name {}", script_path.display()))?;
    let dest = output_dir.join(name);
    if dest == script_path {
        return Ok(dest);
    }
    let contents =
        fs::read(script_path).with_context(|| format!("read script {}", script_path.display()))?;
    write_atomic(&dest, &contents)?;
    Ok(dest)
}

/// Pretty JSON with a trailing newline, written atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// `costs.json` contents.
#[derive(Debug, Clone, Serialize)]
pub struct CostReport {
    pub limit_usd: f64,
    pub spent_usd: f64,
    pub remaining_usd: f64,
    pub percent_used: f64,
    pub by_model_usd: BTreeMap<String, f64>,
    pub records: Vec<CostRecord>,
}

impl CostReport {
    pub fn from_ledger(ledger: &BudgetLedger) -> Self {
        Self {
            limit_usd: ledger.limit().as_usd(),
            spent_usd: ledger.total_spent().as_usd(),
            remaining_usd: ledger.remaining().as_usd(),
            percent_used: ledger.percent_used(),
            by_model_usd: ledger
                .breakdown_by_model()
                .into_iter()
                .map(|(model, cost)| (model, cost.as_usd()))
                .collect(),
            records: ledger.records().to_vec(),
        }
    }
}

pub fn write_cost_report(output_dir: &Path, ledger: &BudgetLedger) -> Result<PathBuf> {
    let path = output_dir.join(COSTS_FILE);
    write_json(&path, &CostReport::from_ledger(ledger))?;
    Ok(path)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("output path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("output path has no file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
