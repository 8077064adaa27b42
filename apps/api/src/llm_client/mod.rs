/// LLM Gateway — the single point of entry for all model calls in the
/// analysis pipeline.
///
/// ARCHITECTURAL RULE: No other module may call the provider API directly.
/// All LLM interactions MUST go through this module.
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analysis::prompts;
use crate::analysis::schema::PromptVersion;
use crate::config::Config;

pub mod cross_cutting_prompts;

const REQUEST_TIMEOUT_SECS: u64 = 120;
const MAX_OUTPUT_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("openai request timeout")]
    Timeout,

    #[error("llm http error: {0}")]
    Http(reqwest::Error),

    #[error("llm api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("llm output parse failed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("llm output empty content")]
    EmptyContent,
}

impl LlmError {
    fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Http(e)
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Http(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types (OpenAI chat completions)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Call inputs
// ────────────────────────────────────────────────────────────────────────────

/// Everything the gateway needs to render an analysis prompt.
#[derive(Debug, Clone)]
pub struct AnalyzeInput {
    pub resume_text: String,
    pub job_description: String,
    pub prompt_version: PromptVersion,
    pub target_role: String,
}

/// Previous payload plus the validation error, for the fix-JSON round.
#[derive(Debug, Clone)]
pub struct FixJson {
    pub payload: String,
    pub error: String,
}

/// Per-call metadata passed explicitly through the pipeline instead of a
/// dynamic side channel: request id for log correlation, an optional extra
/// system message, and an optional fix-JSON payload.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub request_id: Uuid,
    pub extra_system: Option<String>,
    pub fix_json: Option<FixJson>,
}

impl CallOptions {
    pub fn new(request_id: Uuid) -> Self {
        CallOptions {
            request_id,
            extra_system: None,
            fix_json: None,
        }
    }

    pub fn with_extra_system(mut self, message: impl Into<String>) -> Self {
        self.extra_system = Some(message.into());
        self
    }

    pub fn with_fix_json(mut self, payload: impl Into<String>, error: impl Into<String>) -> Self {
        self.fix_json = Some(FixJson {
            payload: payload.into(),
            error: error.into(),
        });
        self
    }
}

/// Raw model output plus the provider-computed prompt fingerprint (only the
/// openai provider emits one).
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    pub raw: String,
    pub prompt_hash: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway
// ────────────────────────────────────────────────────────────────────────────

/// The single LLM gateway used by the worker pipeline. Wraps an
/// OpenAI-compatible chat-completions endpoint with one transient-error
/// retry after a fixed back-off.
#[derive(Clone)]
pub struct LlmGateway {
    client: Client,
    base_url: String,
    api_key: String,
    provider: String,
    model: String,
    retry_base_delay: std::time::Duration,
}

impl LlmGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            api_key: config.llm_api_key.clone(),
            provider: config.llm_provider.clone(),
            model: config.llm_model.clone(),
            retry_base_delay: std::time::Duration::from_millis(config.llm_retry_base_delay_ms),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Runs one analysis call. Transient failures (timeout, 429, 5xx) get
    /// exactly one retry after the configured back-off.
    pub async fn analyze(
        &self,
        input: &AnalyzeInput,
        opts: &CallOptions,
    ) -> Result<LlmOutcome, LlmError> {
        let messages = build_messages(input, opts);
        let prompt_hash = if self.provider == "openai" {
            Some(prompt_fingerprint(&messages))
        } else {
            None
        };

        let mut last_error: Option<LlmError> = None;
        for attempt in 0..2 {
            if attempt > 0 {
                warn!(
                    request_id = %opts.request_id,
                    "LLM call failed transiently, retrying after {}ms",
                    self.retry_base_delay.as_millis()
                );
                tokio::time::sleep(self.retry_base_delay).await;
            }

            match self.call_once(&messages).await {
                Ok(raw) => {
                    return Ok(LlmOutcome {
                        raw,
                        prompt_hash,
                    });
                }
                Err(e) if e.is_transient() => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(LlmError::EmptyContent))
    }

    async fn call_once(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request_body = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.2,
            max_tokens: MAX_OUTPUT_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(LlmError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(LlmError::from_transport)?;

        if let Some(usage) = &chat.usage {
            debug!(
                "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        let content = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or(LlmError::EmptyContent)?;

        Ok(strip_json_fences(content).to_string())
    }
}

/// Renders the message list for one analysis call: versioned system prompt,
/// optional extra system message, the user prompt, and (when retrying) the
/// fix-JSON instruction plus the offending payload.
fn build_messages(input: &AnalyzeInput, opts: &CallOptions) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage {
        role: "system",
        content: prompts::system_prompt(input.prompt_version).to_string(),
    }];

    if let Some(extra) = &opts.extra_system {
        messages.push(ChatMessage {
            role: "system",
            content: extra.clone(),
        });
    }

    if opts.fix_json.is_some() {
        messages.push(ChatMessage {
            role: "system",
            content: prompts::FIX_JSON_SYSTEM.to_string(),
        });
    }

    messages.push(ChatMessage {
        role: "user",
        content: prompts::render_user_prompt(input),
    });

    if let Some(fix) = &opts.fix_json {
        messages.push(ChatMessage {
            role: "user",
            content: prompts::render_fix_json_prompt(&fix.payload, &fix.error),
        });
    }

    messages
}

/// SHA-256 over the rendered messages, recorded for prompt audit.
fn prompt_fingerprint(messages: &[ChatMessage]) -> String {
    let mut hasher = Sha256::new();
    for message in messages {
        hasher.update(message.role.as_bytes());
        hasher.update(b"\n");
        hasher.update(message.content.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Removes a wrapping ```json ... ``` (or bare ```) code fence from LLM
/// output. An unterminated fence loses only its opening marker.
fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(opened) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };

    let body = opened.trim_start();
    match body.strip_suffix("```") {
        Some(inner) => inner.trim(),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> AnalyzeInput {
        AnalyzeInput {
            resume_text: "Senior Rust engineer.".to_string(),
            job_description: "We need Rust.".to_string(),
            prompt_version: PromptVersion::V2_3,
            target_role: String::new(),
        }
    }

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let raw = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(raw), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let raw = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(raw), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let raw = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(raw), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_messages_include_versioned_system_and_user() {
        let opts = CallOptions::new(Uuid::new_v4());
        let messages = build_messages(&input(), &opts);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert!(messages[1].content.contains("Senior Rust engineer."));
        assert!(messages[1].content.contains("We need Rust."));
    }

    #[test]
    fn test_fix_json_round_adds_system_and_payload() {
        let opts = CallOptions::new(Uuid::new_v4())
            .with_fix_json("{\"bad\": true}", "scoreBreakdown sums to 95");
        let messages = build_messages(&input(), &opts);
        assert_eq!(messages.len(), 4);
        assert!(messages[1].content.contains("valid JSON"));
        assert!(messages[3].content.contains("scoreBreakdown sums to 95"));
        assert!(messages[3].content.contains("{\"bad\": true}"));
    }

    #[test]
    fn test_extra_system_message_is_inserted() {
        let opts = CallOptions::new(Uuid::new_v4()).with_extra_system("repair the bullets");
        let messages = build_messages(&input(), &opts);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "system");
        assert_eq!(messages[1].content, "repair the bullets");
    }

    #[test]
    fn test_prompt_fingerprint_is_stable_and_input_sensitive() {
        let opts = CallOptions::new(Uuid::new_v4());
        let messages = build_messages(&input(), &opts);
        let a = prompt_fingerprint(&messages);
        let b = prompt_fingerprint(&messages);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let mut other = input();
        other.resume_text.push_str(" Extra line.");
        let c = prompt_fingerprint(&build_messages(&other, &opts));
        assert_ne!(a, c);
    }
}
