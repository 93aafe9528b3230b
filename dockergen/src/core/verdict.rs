//! Verdict rule over probe results.
//!
//! Only critical probes decide the verdict. Informational probes are carried
//! through for the report but never flip `passed`.

use crate::core::types::{ProbeResult, ValidationVerdict};

impl ValidationVerdict {
    /// Aggregate probe results, kept in execution order.
    pub fn from_probes(probes: Vec<ProbeResult>) -> Self {
        let passed = probes
            .iter()
            .filter(|p| p.probe.is_critical())
            .all(|p| p.passed);
        let error = if passed {
            None
        } else {
            Some(failure_summary(&probes))
        };
        Self {
            passed,
            probes,
            error,
        }
    }

    /// Verdict for a suite that aborted before every probe could run.
    pub fn aborted(probes: Vec<ProbeResult>, reason: &str) -> Self {
        Self {
            passed: false,
            probes,
            error: Some(format!("Validation failed: {reason}")),
        }
    }
}

/// Human-readable error naming the failed probes and their errors.
pub fn failure_summary(probes: &[ProbeResult]) -> String {
    let failed: Vec<&ProbeResult> = probes.iter().filter(|p| !p.passed).collect();
    if failed.is_empty() {
        return "Validation failed for unknown reasons".to_string();
    }
    let names: Vec<&str> = failed.iter().map(|p| p.name()).collect();
    let mut message = format!("Validation failed: {} tests failed", names.join(", "));
    let errors: Vec<&str> = failed.iter().filter_map(|p| p.error.as_deref()).collect();
    if !errors.is_empty() {
        message.push_str(". Errors: ");
        message.push_str(&errors.join("; "));
    }
    message
}
