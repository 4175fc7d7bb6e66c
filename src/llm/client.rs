//! Model backend seam
//!
//! The engine consumes one black-box capability: prompt in, text out.
//! [`ModelBackend`] is that seam; [`HttpBackend`] implements it against
//! an OpenAI-compatible chat-completions endpoint with rate-limit
//! retries. Callers must never assume well-formed output - replies can
//! be empty, garbled, or prose where JSON was requested.

use crate::error::EngineError;
use crate::util::truncate_str;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call options forwarded to the backend.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Backend model identifier, e.g. "anthropic/claude-sonnet-4.5".
    pub model: String,
    /// Ask the backend for a JSON object response where supported.
    pub json_mode: bool,
}

/// Black-box text generation capability. Implementations must be safe
/// to share across concurrent independent requests.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> anyhow::Result<String>;
}

/// Wrap a backend call in the caller-supplied timeout. Timeouts surface
/// as [`EngineError::BackendUnavailable`] so detection and repair can
/// apply their degrade paths.
pub async fn generate_with_timeout(
    backend: &dyn ModelBackend,
    system: &str,
    user: &str,
    options: &GenerateOptions,
    timeout: Duration,
) -> anyhow::Result<String> {
    match tokio::time::timeout(timeout, backend.generate(system, user, options)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::BackendUnavailable(format!(
            "call timed out after {}s",
            timeout.as_secs()
        ))
        .into()),
    }
}

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;
const BACKOFF_MULTIPLIER: u64 = 2;

const MAX_COMPLETION_TOKENS: u32 = 16384;

/// HTTP chat-completions backend.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

/// Extract a retry-after hint from a rate-limit response body, if the
/// provider included one.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    if let Some(pos) = text_lower.find("retry") {
        let after_retry = &text_lower[pos..];
        for word in after_retry.split_whitespace().skip(1).take(5) {
            if let Ok(secs) = word
                .trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
            {
                if secs > 0 && secs < 300 {
                    return Some(secs);
                }
            }
        }
    }
    None
}

#[async_trait]
impl ModelBackend for HttpBackend {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> anyhow::Result<String> {
        let response_format = if options.json_mode {
            Some(ResponseFormat {
                format_type: "json_object".to_string(),
            })
        } else {
            None
        };

        let request = ChatRequest {
            model: options.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: MAX_COMPLETION_TOKENS,
            stream: false,
            response_format,
        };

        let mut retry_count = 0;

        loop {
            let response = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await
                .map_err(|e| EngineError::BackendUnavailable(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| EngineError::BackendUnavailable(e.to_string()))?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    EngineError::BackendUnavailable(format!(
                        "unparseable completion response: {} ({})",
                        e,
                        truncate_str(&text, 200)
                    ))
                })?;

                let content = parsed
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .unwrap_or_default();

                return Ok(content);
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;

                let retry_after = parse_retry_after(&text)
                    .unwrap_or_else(|| INITIAL_BACKOFF_SECS * BACKOFF_MULTIPLIER.pow(retry_count - 1));

                tracing::warn!(
                    retry_after,
                    attempt = retry_count,
                    max = MAX_RETRIES,
                    "backend rate limited, backing off"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            let message = match status.as_u16() {
                401 => "invalid API key".to_string(),
                429 => format!("rate limited after {} retries", retry_count),
                500..=599 => format!("server error ({})", status),
                _ => format!("API error {}: {}", status, truncate_str(&text, 200)),
            };
            return Err(EngineError::BackendUnavailable(message).into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_with_hint() {
        assert_eq!(
            parse_retry_after("rate limited, retry after 12 seconds"),
            Some(12)
        );
    }

    #[test]
    fn test_parse_retry_after_without_hint() {
        assert_eq!(parse_retry_after("too many requests"), None);
        assert_eq!(parse_retry_after("retry later please ok then"), None);
    }

    #[test]
    fn test_parse_retry_after_rejects_absurd_values() {
        assert_eq!(parse_retry_after("retry after 100000 seconds"), None);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_backend_unavailable() {
        struct SlowBackend;

        #[async_trait]
        impl ModelBackend for SlowBackend {
            async fn generate(
                &self,
                _system: &str,
                _user: &str,
                _options: &GenerateOptions,
            ) -> anyhow::Result<String> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(String::new())
            }
        }

        let options = GenerateOptions {
            model: "test".to_string(),
            json_mode: false,
        };
        let err = generate_with_timeout(
            &SlowBackend,
            "sys",
            "user",
            &options,
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();

        let kind = err.downcast_ref::<EngineError>().expect("typed error");
        assert!(matches!(kind, EngineError::BackendUnavailable(_)));
    }
}
