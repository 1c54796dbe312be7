//! Chat Completions client
//!
//! Sends one `/chat/completions` request with the continuity tools attached
//! and decodes the first choice into plain content plus raw tool calls.
//! Connection errors and 5xx responses are retried with exponential backoff,
//! all within the configured request timeout.

use super::tools::{tool_definitions, ToolCall};
use crate::{ContinuityConfig, ContinuityError, Result};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_RETRY_ATTEMPTS: u32 = 4;
const RETRY_BASE_DELAY_MS: u64 = 200;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ─── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    tools: Vec<Value>,
    tool_choice: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// Usually a JSON string; some providers send an object
    #[serde(default)]
    arguments: Value,
}

impl From<WireToolCall> for ToolCall {
    fn from(call: WireToolCall) -> Self {
        let arguments = match call.function.arguments {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Self {
            id: call.id,
            name: call.function.name,
            arguments,
        }
    }
}

/// Decoded assistant reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    /// Assistant text with reasoning blocks removed
    pub content: String,
    /// Tool calls in the order the model emitted them
    pub tool_calls: Vec<ToolCall>,
}

// ─── Client ─────────────────────────────────────────────────────────

pub struct ChatClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_attempts: u32,
    request_timeout: Duration,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ChatClient {
    /// Build a client from config, reading the API key from the environment.
    pub fn from_config(config: &ContinuityConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Self::new(config, api_key)
    }

    pub fn new(config: &ContinuityConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(config.request_timeout))
            .user_agent(concat!("continuity/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ContinuityError::Config(format!("HTTP client: {e}")))?;

        info!(
            "Chat client: model={}, base_url={}, timeout={:?}",
            config.model, config.base_url, config.request_timeout
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            max_attempts: MAX_RETRY_ATTEMPTS,
            request_timeout: config.request_timeout,
        })
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send system + user messages with the continuity tools, retrying
    /// transient failures. The whole exchange, retries included, is bounded
    /// by the configured request timeout.
    pub async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<ChatReply> {
        debug!("Calling chat completions, user message length: {}", user_message.len());

        match tokio::time::timeout(
            self.request_timeout,
            self.complete_with_retry(system_prompt, user_message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ContinuityError::ExternalService(format!(
                "timeout: no reply within {:?}",
                self.request_timeout
            ))),
        }
    }

    async fn complete_with_retry(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<ChatReply> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = Self::retry_backoff(attempt);
                tokio::time::sleep(delay).await;
            }

            match self.send_request(system_prompt, user_message).await {
                Ok(reply) => {
                    debug!(
                        "Chat reply: {} chars, {} tool calls",
                        reply.content.len(),
                        reply.tool_calls.len()
                    );
                    return Ok(reply);
                }
                Err(failure) => {
                    attempt += 1;
                    if !failure.retryable || attempt >= self.max_attempts {
                        return Err(failure.error);
                    }
                    warn!(
                        "Chat request failed (attempt {}/{}), retrying: {}",
                        attempt, self.max_attempts, failure.error
                    );
                }
            }
        }
    }

    async fn send_request(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> std::result::Result<ChatReply, AttemptError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_message.to_string(),
                },
            ],
            tools: tool_definitions(),
            tool_choice: "auto",
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let response = Self::check_response_status(response).await?;

        let body = response.text().await.map_err(Self::map_reqwest_error)?;
        Self::parse_reply(&body).map_err(AttemptError::fatal)
    }

    /// Decode a chat-completions response body.
    pub fn parse_reply(body: &str) -> Result<ChatReply> {
        let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
            ContinuityError::ExternalService(format!("malformed response: {e}"))
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            ContinuityError::ExternalService("response contained no choices".to_string())
        })?;

        Ok(ChatReply {
            content: strip_think_tags(choice.message.content.as_deref().unwrap_or("")),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(ToolCall::from)
                .collect(),
        })
    }

    /// Exponential backoff with jitter
    fn retry_backoff(attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base_ms = RETRY_BASE_DELAY_MS.saturating_mul(exp);
        let jitter = 1.0 + ((attempt as f64 * 0.37).sin() * 0.1);
        Duration::from_millis((base_ms as f64 * jitter) as u64)
    }

    /// Non-2xx responses become errors; only 5xx is worth another attempt.
    async fn check_response_status(
        response: reqwest::Response,
    ) -> std::result::Result<reqwest::Response, AttemptError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = truncate_chars(&extract_error_detail(&body), 500);
        let error = if detail.is_empty() {
            ContinuityError::ExternalService(format!("API error {status}"))
        } else {
            ContinuityError::ExternalService(format!("API error {status}: {detail}"))
        };
        Err(AttemptError {
            error,
            retryable: status.is_server_error(),
        })
    }

    /// Connection failures are retried. A timed-out attempt has already used
    /// the exchange budget, so it is not.
    fn map_reqwest_error(e: reqwest::Error) -> AttemptError {
        if e.is_timeout() {
            AttemptError::fatal(ContinuityError::ExternalService(format!("timeout: {e}")))
        } else if e.is_connect() || e.is_request() {
            AttemptError {
                error: ContinuityError::ExternalService(format!("network: {e}")),
                retryable: true,
            }
        } else {
            AttemptError::fatal(ContinuityError::ExternalService(e.to_string()))
        }
    }
}

/// One failed attempt and whether another is worth making
#[derive(Debug)]
struct AttemptError {
    error: ContinuityError,
    retryable: bool,
}

impl AttemptError {
    fn fatal(error: ContinuityError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    trimmed.to_string()
}

fn truncate_chars(detail: &str, max_chars: usize) -> String {
    if detail.chars().count() <= max_chars {
        return detail.to_string();
    }
    let mut truncated: String = detail.chars().take(max_chars).collect();
    truncated.push_str("... [truncated]");
    truncated
}

/// Drop `<think>...</think>` reasoning blocks some models emit inline
pub fn strip_think_tags(content: &str) -> String {
    static THINK_RE: OnceLock<Regex> = OnceLock::new();
    let re = THINK_RE
        .get_or_init(|| Regex::new(r"(?s)<think>.*?(</think>|$)").expect("valid think regex"));
    re.replace_all(content, "").trim().to_string()
}
