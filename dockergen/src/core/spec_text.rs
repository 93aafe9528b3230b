//! Build-spec (Dockerfile) text extraction from free-form model answers.

use crate::core::types::{RefinementOutcome, ScriptAnalysis};

const INSTRUCTIONS: &[&str] = &[
    "FROM",
    "RUN",
    "COPY",
    "ADD",
    "WORKDIR",
    "EXPOSE",
    "ENV",
    "CMD",
    "ENTRYPOINT",
    "VOLUME",
    "USER",
    "LABEL",
    "ARG",
    "HEALTHCHECK",
    "SHELL",
    "STOPSIGNAL",
    "ONBUILD",
];

const IMPROVED_MARKER: &str = "IMPROVED_DOCKERFILE:";
const CHANGES_MARKER: &str = "CHANGES_MADE:";
const REASONING_MARKER: &str = "REASONING:";

const NO_CHANGES: &str = "No specific changes identified";
const NO_REASONING: &str = "No reasoning provided";

/// Extract a Dockerfile from a model answer.
///
/// Prefers a fenced block, then falls back to the raw text. The result starts
/// at the first `FROM` and ends at the first line that is neither an
/// instruction, a comment, a blank line nor a continuation. Returns `None`
/// when no `FROM` instruction exists.
pub fn extract_build_spec(response: &str) -> Option<String> {
    fenced_block(response)
        .and_then(instruction_run)
        .or_else(|| instruction_run(response))
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip the info string (`dockerfile`, `Dockerfile`, ...).
    let body_start = after_fence.find('\n').map_or(after_fence.len(), |i| i + 1);
    let body = &after_fence[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

fn is_instruction(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .is_some_and(|keyword| INSTRUCTIONS.contains(&keyword))
}

/// `FROM <image>` with the keyword in upper case, so prose such as
/// "From what I can tell ..." never starts a build spec.
fn is_from_line(line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("FROM") {
        return false;
    }
    let image = tokens.find(|t| !t.starts_with("--"));
    image.is_some_and(is_image_ref)
}

fn is_image_ref(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '$')
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/:@${}".contains(c))
}

fn instruction_run(text: &str) -> Option<String> {
    let mut lines = text.lines().skip_while(|line| !is_from_line(line));
    let first = lines.next()?;
    let mut kept = vec![first.trim().to_string()];
    let mut continued = first.trim_end().ends_with('\\');
    for line in lines {
        let trimmed = line.trim();
        if !(continued || trimmed.is_empty() || trimmed.starts_with('#') || is_instruction(trimmed))
        {
            break;
        }
        let kept_line = if continued { line.trim_end() } else { trimmed };
        kept.push(kept_line.to_string());
        continued = trimmed.ends_with('\\');
    }
    Some(kept.join("\n").trim().to_string())
}

/// Parse a refinement answer with `IMPROVED_DOCKERFILE:` / `CHANGES_MADE:` /
/// `REASONING:` sections. Unusable answers yield `fallback_spec` with the
/// `fallback` flag set.
pub fn parse_refinement(response: &str, fallback_spec: &str) -> RefinementOutcome {
    let mut changes = NO_CHANGES.to_string();
    let mut rationale = NO_REASONING.to_string();
    let mut spec = None;

    if let Some(idx) = response.find(IMPROVED_MARKER) {
        let rest = &response[idx + IMPROVED_MARKER.len()..];
        let (spec_part, tail) = split_once_opt(rest, CHANGES_MARKER);
        spec = extract_build_spec(spec_part);
        if let Some(tail) = tail {
            let (changes_part, reasoning_part) = split_once_opt(tail, REASONING_MARKER);
            changes = section_text(changes_part, NO_CHANGES);
            if let Some(reasoning) = reasoning_part {
                rationale = section_text(reasoning, NO_REASONING);
            }
        }
    }
    if spec.is_none() {
        spec = extract_build_spec(response);
    }

    match spec {
        Some(build_spec) => RefinementOutcome {
            build_spec,
            changes,
            rationale,
            fallback: false,
        },
        None => RefinementOutcome {
            build_spec: fallback_spec.to_string(),
            changes: "Created fallback Dockerfile due to parsing issues".to_string(),
            rationale: "Could not parse the refinement answer, created a basic working Dockerfile"
                .to_string(),
            fallback: true,
        },
    }
}

fn split_once_opt<'a>(text: &'a str, marker: &str) -> (&'a str, Option<&'a str>) {
    match text.split_once(marker) {
        Some((head, tail)) => (head, Some(tail)),
        None => (text, None),
    }
}

fn section_text(text: &str, default: &str) -> String {
    let cleaned = text.trim().trim_matches('*').trim();
    if cleaned.is_empty() {
        default.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Minimal known-good Dockerfile used when a refinement answer is unusable.
pub fn fallback_build_spec(analysis: Option<&ScriptAnalysis>, script_name: &str) -> String {
    let (base_image, entry) = match analysis {
        Some(analysis) => (
            analysis.base_image.clone(),
            analysis
                .entry_command
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>(),
        ),
        None => (
            "python:3.11-slim".to_string(),
            vec!["python".to_string(), script_name.to_string()],
        ),
    };
    let entrypoint = serde_json::to_string(&entry).unwrap_or_else(|_| "[]".to_string());
    format!("FROM {base_image}\n\nWORKDIR /app\n\nCOPY . .\n\nENTRYPOINT {entrypoint}\n")
}
