//! Example-invocation parsing.
//!
//! Turns a shell-style example such as `python3 app.py "hello world" -n 2`
//! into the argument vector passed to the artifact's entrypoint.

/// Interpreter prefixes removed before tokenizing. Longest first.
const INTERPRETER_PREFIXES: &[&str] = &["python3", "python", "node", "bash", "sh"];

const SCRIPT_EXTENSIONS: &[&str] = &[".py", ".js", ".mjs", ".ts", ".sh", ".bash"];

/// Parse an example invocation into entrypoint arguments.
///
/// Quoting is respected; unbalanced quotes fall back to whitespace splitting.
/// The script name is dropped when it is the first remaining token.
pub fn parse_example_usage(example: &str, script_name: Option<&str>) -> Vec<String> {
    let usage = strip_interpreter(example.trim());
    let mut parts = match shell_words::split(usage) {
        Ok(parts) => parts,
        Err(_) => usage.split_whitespace().map(str::to_string).collect(),
    };
    if parts
        .first()
        .is_some_and(|first| is_script_token(first, script_name))
    {
        parts.remove(0);
    }
    parts
}

fn strip_interpreter(usage: &str) -> &str {
    for prefix in INTERPRETER_PREFIXES {
        match usage.strip_prefix(prefix) {
            Some(rest) if rest.starts_with(char::is_whitespace) => return rest.trim_start(),
            _ => {}
        }
    }
    usage
}

fn is_script_token(token: &str, script_name: Option<&str>) -> bool {
    let lower = token.to_ascii_lowercase();
    if SCRIPT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return true;
    }
    let Some(name) = script_name else {
        return false;
    };
    let base = token.rsplit('/').next().unwrap_or(token);
    base == name || token.trim_start_matches("./") == name
}
