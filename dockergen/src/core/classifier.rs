//! Deterministic classification of generation-service failures.

use crate::core::error::{GenerationError, GenerationErrorKind};

/// Whether a failure ends the run or may be recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    FatalAuth,
    FatalRateLimit,
    FatalBudget,
    Recoverable,
}

impl ErrorClass {
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorClass::Recoverable)
    }

    /// User-facing message for fatal classes.
    pub fn fatal_message(self) -> Option<&'static str> {
        match self {
            ErrorClass::FatalAuth => {
                Some("Generation service authentication failed. Please check your API key.")
            }
            ErrorClass::FatalRateLimit => {
                Some("Generation service rate limit exceeded. Please try again later.")
            }
            ErrorClass::FatalBudget => Some("Budget exhausted before the run could finish."),
            ErrorClass::Recoverable => None,
        }
    }
}

/// Classify a generation failure.
///
/// The discriminant set by the adapter wins. Errors without one (`Transport`,
/// `Unknown`) fall back to message matching.
pub fn classify(err: &GenerationError) -> ErrorClass {
    match err.kind {
        GenerationErrorKind::AuthFailure => ErrorClass::FatalAuth,
        GenerationErrorKind::RateLimit => ErrorClass::FatalRateLimit,
        GenerationErrorKind::BudgetExceeded => ErrorClass::FatalBudget,
        GenerationErrorKind::BadRequest | GenerationErrorKind::MalformedResponse => {
            ErrorClass::Recoverable
        }
        GenerationErrorKind::Transport | GenerationErrorKind::Unknown => {
            classify_message(&err.message)
        }
    }
}

/// Case-insensitive substring classification of free-form error text.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("invalid api key")
        || lower.contains("unauthorized")
        || contains_status(&lower, "401")
    {
        return ErrorClass::FatalAuth;
    }
    if lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || contains_status(&lower, "429")
    {
        return ErrorClass::FatalRateLimit;
    }
    if lower.contains("exceed budget") || lower.contains("budget exceeded") {
        return ErrorClass::FatalBudget;
    }
    ErrorClass::Recoverable
}

/// Match an HTTP status code as a standalone number, so `4011` or `1401` do not count.
fn contains_status(text: &str, code: &str) -> bool {
    text.match_indices(code).any(|(idx, _)| {
        let before = text[..idx].chars().next_back();
        let after = text[idx + code.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_discriminant_wins_over_message() {
        let err = GenerationError::new(GenerationErrorKind::AuthFailure, "something odd");
        assert_eq!(classify(&err), ErrorClass::FatalAuth);

        let err = GenerationError::new(GenerationErrorKind::BadRequest, "rate limit mentioned");
        assert_eq!(classify(&err), ErrorClass::Recoverable);
    }

    #[test]
    fn transport_errors_fall_back_to_message() {
        let err = GenerationError::new(GenerationErrorKind::Transport, "HTTP 401 Unauthorized");
        assert_eq!(classify(&err), ErrorClass::FatalAuth);

        let err = GenerationError::new(GenerationErrorKind::Unknown, "Rate Limit reached");
        assert_eq!(classify(&err), ErrorClass::FatalRateLimit);

        let err = GenerationError::new(GenerationErrorKind::Unknown, "connection reset");
        assert_eq!(classify(&err), ErrorClass::Recoverable);
    }

    #[test]
    fn message_matching_is_case_insensitive() {
        assert_eq!(
            classify_message("OpenAI AUTHENTICATION FAILED"),
            ErrorClass::FatalAuth
        );
        assert_eq!(
            classify_message("status 429 too many requests"),
            ErrorClass::FatalRateLimit
        );
        assert_eq!(
            classify_message("Request would exceed budget"),
            ErrorClass::FatalBudget
        );
    }

    #[test]
    fn status_codes_must_stand_alone() {
        assert_eq!(classify_message("port 14010 refused"), ErrorClass::Recoverable);
        assert_eq!(classify_message("error (401)"), ErrorClass::FatalAuth);
    }

    #[test]
    fn budget_exceeded_is_fatal() {
        let err = GenerationError::new(GenerationErrorKind::BudgetExceeded, "no money");
        let class = classify(&err);
        assert!(class.is_fatal());
        assert!(class.fatal_message().is_some());
        assert_eq!(ErrorClass::Recoverable.fatal_message(), None);
    }
}
