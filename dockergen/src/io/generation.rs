//! Generation-service seam: the trait, an OpenAI-compatible HTTP adapter and
//! the budget-metering wrapper every call goes through.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::budget::{BudgetLedger, Cost, estimate_tokens};
use crate::core::error::{GenerationError, GenerationErrorKind};

/// One chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    /// `None` uses the service default.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Short label recorded with the charge, e.g. `refine`.
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Model that served the call.
    pub model: String,
}

/// A text-generation collaborator.
///
/// Implementations set [`GenerationError::kind`] at the point of failure so
/// callers never have to inspect message text.
pub trait GenerationService {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<GenerationResponse, GenerationError>> + Send;
}

impl<T: GenerationService + Sync> GenerationService for &T {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<GenerationResponse, GenerationError>> + Send {
        (**self).generate(request)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// OpenAI-compatible chat-completions adapter.
#[derive(Debug, Clone)]
pub struct OpenAiService {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl OpenAiService {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: default_model.into(),
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn exchange(&self, body: &ChatRequest<'_>) -> Result<(u16, String), GenerationError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| transport_error(&e))?;
        Ok((status, text))
    }
}

impl GenerationService for OpenAiService {
    #[instrument(skip_all, fields(purpose = %request.purpose, max_tokens = request.max_tokens))]
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = ChatRequest {
            model,
            messages: [
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let (status, text) = match tokio::time::timeout(self.timeout, self.exchange(&body)).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "generation request timed out");
                return Err(GenerationError::new(
                    GenerationErrorKind::Transport,
                    format!(
                        "generation request timed out after {}s",
                        self.timeout.as_secs()
                    ),
                ));
            }
        };
        debug!(status, bytes = text.len(), "generation response received");

        if !(200..300).contains(&status) {
            return Err(error_for_status(status, &text));
        }
        let mut parsed = parse_chat_response(&text, &request.system, &request.user)?;
        if parsed.model.is_empty() {
            parsed.model = model.to_string();
        }
        Ok(parsed)
    }
}

fn transport_error(err: &reqwest::Error) -> GenerationError {
    GenerationError::new(
        GenerationErrorKind::Transport,
        format!("generation request failed: {err}"),
    )
}

/// Map a non-success HTTP status to a typed failure.
pub fn error_for_status(status: u16, body: &str) -> GenerationError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.message)
        .unwrap_or_else(|_| truncate_chars(body.trim(), 200).to_string());
    match status {
        401 | 403 => GenerationError::auth(format!(
            "authentication failed (HTTP {status}): {detail}"
        )),
        429 => GenerationError::rate_limited(format!("rate limit exceeded (HTTP 429): {detail}")),
        400..=499 => GenerationError::new(
            GenerationErrorKind::BadRequest,
            format!("request rejected (HTTP {status}): {detail}"),
        ),
        _ => GenerationError::new(
            GenerationErrorKind::Transport,
            format!("service error (HTTP {status}): {detail}"),
        ),
    }
}

/// Parse a chat-completions body. Missing usage is estimated from the text.
pub fn parse_chat_response(
    body: &str,
    system: &str,
    user: &str,
) -> Result<GenerationResponse, GenerationError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        GenerationError::malformed(format!("failed to parse generation response: {e}"))
    })?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| GenerationError::malformed("generation response has no content"))?;
    let (prompt_tokens, completion_tokens) = match parsed.usage {
        Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
        None => (
            estimate_tokens(system).saturating_add(estimate_tokens(user)),
            estimate_tokens(&content),
        ),
    };
    Ok(GenerationResponse {
        content,
        prompt_tokens,
        completion_tokens,
        model: parsed.model.unwrap_or_default(),
    })
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Enforces a [`BudgetLedger`] around any [`GenerationService`].
///
/// Every call is estimated first and refused with
/// [`GenerationErrorKind::BudgetExceeded`] before it is issued when the
/// estimate does not fit. The actual cost is recorded from the reported usage.
#[derive(Debug)]
pub struct MeteredGenerator<G> {
    inner: G,
    default_model: String,
    ledger: Mutex<BudgetLedger>,
}

impl<G: GenerationService> MeteredGenerator<G> {
    pub fn new(inner: G, default_model: impl Into<String>, limit: Cost) -> Self {
        Self {
            inner,
            default_model: default_model.into(),
            ledger: Mutex::new(BudgetLedger::new(limit)),
        }
    }

    /// Snapshot of the ledger.
    pub fn ledger(&self) -> BudgetLedger {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<G: GenerationService + Sync> GenerationService for MeteredGenerator<G> {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let prompt_tokens =
            estimate_tokens(&request.system).saturating_add(estimate_tokens(&request.user));

        {
            let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
            let estimate = ledger.estimate(prompt_tokens, request.max_tokens, &model);
            if !ledger.can_afford(estimate) {
                warn!(
                    purpose = %request.purpose,
                    estimate = %estimate,
                    remaining = %ledger.remaining(),
                    "generation call refused by budget"
                );
                return Err(GenerationError::new(
                    GenerationErrorKind::BudgetExceeded,
                    format!(
                        "request would exceed budget: estimated {estimate}, remaining {}",
                        ledger.remaining()
                    ),
                ));
            }
        }

        let metered = GenerationRequest {
            model: Some(model.clone()),
            ..request.clone()
        };
        let response = self.inner.generate(&metered).await?;

        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        let actual = ledger.estimate(response.prompt_tokens, response.completion_tokens, &model);
        ledger.record_with_description(
            actual,
            &model,
            response
                .prompt_tokens
                .saturating_add(response.completion_tokens),
            &request.purpose,
        );
        debug!(cost = %actual, total = %ledger.total_spent(), "generation call recorded");
        Ok(response)
    }
}
