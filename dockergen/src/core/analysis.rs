//! Heuristic script analysis.
//!
//! Language detection, dependency extraction and runtime-version guesses run
//! on the script text alone. Hints from the generation service are merged on
//! top by [`build_analysis`]; every hint is optional.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::core::types::{Language, ScriptAnalysis};

/// Hints returned by the generation service. Missing fields keep heuristics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalysisHints {
    pub base_image: Option<String>,
    pub runtime_version: Option<String>,
    pub additional_packages: Vec<String>,
    pub environment_vars: BTreeMap<String, String>,
    pub security_considerations: Vec<String>,
    pub optimization_suggestions: Vec<String>,
}

fn patterns(sources: &[&str]) -> Vec<Regex> {
    sources
        .iter()
        .map(|src| Regex::new(&format!("(?im){src}")).unwrap())
        .collect()
}

static LANGUAGE_PATTERNS: LazyLock<Vec<(Language, Vec<Regex>)>> = LazyLock::new(|| {
    vec![
        (
            Language::Python,
            patterns(&[
                r"#!/usr/bin/env python",
                r"#!/usr/bin/python",
                r"import ",
                r"from .* import",
                r"def ",
                r"if __name__",
            ]),
        ),
        (
            Language::JavaScript,
            patterns(&[
                r"#!/usr/bin/env node",
                r"#!/usr/bin/node",
                r"require\(",
                r"console\.log",
                r"function ",
                r"const ",
                r"let ",
                r"var ",
            ]),
        ),
        (
            Language::Bash,
            patterns(&[
                r"#!/bin/bash",
                r"#!/bin/sh",
                r"#!/usr/bin/env bash",
                r"echo ",
                r"if \[",
                r"for .*in",
            ]),
        ),
    ]
});

static PY_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*import\s+([A-Za-z_][\w.]*)").unwrap());
static PY_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*from\s+([A-Za-z_][\w.]*)\s+import").unwrap());
static JS_REQUIRE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static JS_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import[^;\n]*?from\s+['"]([^'"]+)['"]"#).unwrap());
static PY_REQUIRES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"python_requires\s*=\s*['"]([^'"]+)['"]"#).unwrap());

const PYTHON_STDLIB: &[&str] = &[
    "argparse",
    "collections",
    "csv",
    "datetime",
    "functools",
    "itertools",
    "json",
    "logging",
    "math",
    "os",
    "pathlib",
    "random",
    "re",
    "shutil",
    "string",
    "subprocess",
    "sys",
    "time",
    "typing",
];

const NODE_BUILTINS: &[&str] = &[
    "crypto",
    "fs",
    "http",
    "https",
    "os",
    "path",
    "querystring",
    "readline",
    "url",
    "util",
];

const BASH_INCOMPATIBLE_IMAGES: &[&str] = &["alpine", "scratch", "busybox", "distroless"];

/// Detect the script language, extension first, then content scores.
///
/// Returns `None` when nothing supported matches.
pub fn detect_language(script_path: &Path, content: &str) -> Option<Language> {
    let ext = script_path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("py") => return Some(Language::Python),
        Some("js" | "mjs" | "ts") => return Some(Language::JavaScript),
        Some("sh" | "bash") => return Some(Language::Bash),
        _ => {}
    }

    let mut best: Option<(Language, usize)> = None;
    for (language, regexes) in LANGUAGE_PATTERNS.iter() {
        let score: usize = regexes.iter().map(|re| re.find_iter(content).count()).sum();
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((*language, score));
        }
    }
    best.map(|(language, _)| language)
}

/// Third-party dependencies referenced by the script, sorted and deduplicated.
pub fn extract_dependencies(content: &str, language: Language) -> Vec<String> {
    let mut deps = BTreeSet::new();
    match language {
        Language::Python => {
            for re in [&*PY_IMPORT_RE, &*PY_FROM_RE] {
                for cap in re.captures_iter(content) {
                    let top = cap[1].split('.').next().unwrap_or_default();
                    if !top.is_empty() && !PYTHON_STDLIB.contains(&top) {
                        deps.insert(top.to_string());
                    }
                }
            }
        }
        Language::JavaScript => {
            for re in [&*JS_REQUIRE_RE, &*JS_IMPORT_RE] {
                for cap in re.captures_iter(content) {
                    let module = &cap[1];
                    if is_third_party_js(module) {
                        deps.insert(module.to_string());
                    }
                }
            }
        }
        Language::Bash => {}
    }
    deps.into_iter().collect()
}

fn is_third_party_js(module: &str) -> bool {
    !module.starts_with('.')
        && !module.starts_with('/')
        && !module.starts_with("node:")
        && !NODE_BUILTINS.contains(&module)
}

/// Guess the runtime version from syntax markers.
pub fn detect_runtime_version(content: &str, language: Language) -> Option<String> {
    match language {
        Language::Python => {
            if let Some(cap) = PY_REQUIRES_RE.captures(content) {
                return Some(cap[1].to_string());
            }
            if ["print(", "f\"", "f'", "//"]
                .iter()
                .any(|marker| content.contains(marker))
            {
                Some("3.11".to_string())
            } else if content.contains("print ") {
                Some("2.7".to_string())
            } else {
                None
            }
        }
        Language::JavaScript => {
            let modern = ["async ", "await ", "const ", "let "]
                .iter()
                .any(|marker| content.contains(marker));
            Some(if modern { "18" } else { "16" }.to_string())
        }
        Language::Bash => None,
    }
}

pub fn entry_command(script_name: &str, language: Language) -> String {
    format!("{} {script_name}", language.interpreter())
}

/// Merge heuristics with optional service hints into a [`ScriptAnalysis`].
pub fn build_analysis(
    language: Language,
    script_name: &str,
    content: &str,
    hints: &AnalysisHints,
) -> ScriptAnalysis {
    let mut base_image = hints
        .base_image
        .clone()
        .filter(|image| !image.trim().is_empty())
        .unwrap_or_else(|| language.default_base_image().to_string());
    if language == Language::Bash {
        let lower = base_image.to_ascii_lowercase();
        if BASH_INCOMPATIBLE_IMAGES.iter().any(|p| lower.contains(p)) {
            base_image = Language::Bash.default_base_image().to_string();
        }
    }
    ScriptAnalysis {
        language,
        runtime_version: hints
            .runtime_version
            .clone()
            .or_else(|| detect_runtime_version(content, language)),
        dependencies: extract_dependencies(content, language),
        base_image,
        entry_command: entry_command(script_name, language),
        additional_packages: hints.additional_packages.clone(),
        environment_vars: hints.environment_vars.clone(),
    }
}
