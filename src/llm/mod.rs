//! A black-box text completer behind a bounded retry wrapper.
//!
//! Every LLM-backed service in this crate (Router, Intent, SQL Builder's
//! SELECT generation) treats the model as a best-effort enricher: callers
//! never fail on LLM errors alone, they fall back to a deterministic
//! heuristic instead. This module only provides the completion call and the
//! retry/backoff policy; the fallback logic lives with each caller.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::error::LlmError;

/// A single chat-completion request/response round trip against an
/// OpenAI-chat-completions-compatible endpoint (matches the original
/// `ChatOpenAI(base_url=...)` usage: any provider exposing that wire
/// format, not only OpenAI itself, works here).
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl LlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Request)?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        })
    }

    /// Sends `prompt` as a single user message with temperature 0 and
    /// returns the completion's text content plus token usage.
    pub async fn complete(&self, prompt: &str) -> Result<(String, TokenUsage), LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.http.post(url).json(&json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}],
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Request(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(LlmError::InvalidResponse(format!(
                "provider returned status {}",
                response.status()
            )));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(LlmError::Request)?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let usage = body
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();
        Ok((content, usage))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// Bounded retry wrapper: retries on both transport errors and a
/// caller-supplied validator rejecting the response. Backoff is linear,
/// `backoff_seconds * attempt`. The last error is re-raised on exhaustion.
pub async fn complete_with_retry(
    client: &LlmClient,
    prompt: &str,
    attempts: u32,
    backoff_seconds: f64,
    validator: impl Fn(&str) -> bool,
    task_name: &str,
) -> Result<(String, TokenUsage), LlmError> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match client.complete(prompt).await {
            Ok((content, usage)) if validator(&content) => return Ok((content, usage)),
            Ok((content, _)) => {
                tracing::warn!(
                    task = task_name,
                    attempt,
                    attempts,
                    %content,
                    "llm response rejected by validator"
                );
                last_error = Some(LlmError::ValidatorRejected);
            }
            Err(e) => {
                tracing::warn!(task = task_name, attempt, attempts, error = %e, "llm call failed");
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            let sleep_for = Duration::from_secs_f64(backoff_seconds * attempt as f64);
            tokio::time::sleep(sleep_for).await;
        }
    }

    Err(last_error.unwrap_or(LlmError::InvalidResponse("unknown error".into())))
}

/// Extracts the first balanced-looking `{...}` JSON object from free text
/// and parses it. Mirrors the original's `raw.find("{")` / `raw.rfind("}")`
/// slice-and-parse approach.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_object_from_surrounding_prose() {
        let text = "Sure, here you go: {\"route\":\"SQL\"} thanks!";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["route"], "SQL");
    }

    #[test]
    fn extract_json_object_returns_none_without_braces() {
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn extract_json_object_returns_none_when_braces_reversed() {
        assert!(extract_json_object("} {").is_none());
    }
}
