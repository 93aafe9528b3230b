//! Behavior cases inferred from keywords in the script source.

/// One argument to pass to the artifact and what it should demonstrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorCase {
    pub argument: String,
    pub expected: String,
}

const KEYWORD_CASES: &[(&str, &str, &str)] = &[
    ("hello world", "Hello World", "Processes Hello World input"),
    ("count", "test input", "Counts something in the input"),
    ("reverse", "abc def", "Reverses the input"),
];

/// Cases are returned in keyword order; zero cases is a valid answer.
pub fn infer_cases(source: &str) -> Vec<BehaviorCase> {
    let lower = source.to_lowercase();
    KEYWORD_CASES
        .iter()
        .filter(|(keyword, _, _)| lower.contains(keyword))
        .map(|(_, argument, expected)| BehaviorCase {
            argument: (*argument).to_string(),
            expected: (*expected).to_string(),
        })
        .collect()
}
