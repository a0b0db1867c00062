// compile-service-rs/src/fix_client.rs
// HTTP client for the LLM fix service (OpenAI-compatible chat API).
//
// Configuration (.env file or process environment):
// - LLM_API_KEY: API key for the provider
// - LLM_API_URL: endpoint URL (defaults to the OpenAI chat completions URL)
// - LLM_MODEL: model to use
// - LLM_REQUEST_TIMEOUT_SECS: per-request HTTP timeout (default: 60)
// - LLM_MAX_RETRIES: maximum retry attempts (default: 3)
// - LLM_INITIAL_RETRY_DELAY_MS: initial backoff delay in ms (default: 1000)
// - LLM_MAX_RETRY_DELAY_MS: maximum backoff delay in ms (default: 30000)

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Low temperature favors deterministic, minimal edits.
const FIX_TEMPERATURE: f32 = 0.1;
const FIX_MAX_TOKENS: u32 = 4096;

const SYSTEM_PROMPT: &str = "You are a LaTeX repair assistant. You receive a LaTeX document \
that failed to compile together with a summary of the compiler error. Respond with the complete \
corrected document and nothing else. Do not add commentary or explanations.";

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[derive(Debug, Error)]
pub enum FixError {
    #[error("fix service not configured: {0}")]
    NotConfigured(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Server-side and transport failures are worth retrying; client-side
/// errors need intervention and are not.
fn is_retryable(error: &FixError) -> bool {
    matches!(
        error,
        FixError::Server(_) | FixError::Network(_) | FixError::RateLimited(_)
    )
}

/// Seam between the retry loop and the real network client.
#[async_trait]
pub trait FixProvider: Send + Sync {
    async fn request_fix(&self, source: &str, error_message: &str) -> Result<String, FixError>;
}

#[derive(Debug)]
pub struct FixClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    max_retries: u32,
    initial_retry_delay_ms: u64,
    max_retry_delay_ms: u64,
}

impl FixClient {
    pub fn from_env() -> Self {
        let api_url = env::var("LLM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let api_key = env::var("LLM_API_KEY").unwrap_or_default();

        let max_retries = config_rs::get_env_parsed("LLM_MAX_RETRIES", 3u32);
        let initial_retry_delay_ms = config_rs::get_env_parsed("LLM_INITIAL_RETRY_DELAY_MS", 1000u64);
        let max_retry_delay_ms = config_rs::get_env_parsed("LLM_MAX_RETRY_DELAY_MS", 30000u64);
        let timeout_secs = config_rs::get_env_parsed("LLM_REQUEST_TIMEOUT_SECS", 60u64);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key,
            api_url,
            model,
            max_retries,
            initial_retry_delay_ms,
            max_retry_delay_ms,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_retry_delay_ms))
            .with_max_interval(Duration::from_millis(self.max_retry_delay_ms))
            .with_multiplier(2.0)
            .with_max_elapsed_time(Some(Duration::from_secs(120)))
            .with_randomization_factor(0.5)
            .build()
    }

    async fn execute_request(
        &self,
        request_body: &ChatCompletionRequest,
    ) -> Result<String, FixError> {
        let response = match self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request_body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                if err.is_timeout() {
                    return Err(FixError::Network(format!("request timed out: {}", err)));
                } else if err.is_connect() {
                    return Err(FixError::Network(format!("connection failed: {}", err)));
                }
                return Err(FixError::Network(format!("network error: {}", err)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return match status.as_u16() {
                400 => Err(FixError::InvalidRequest(format!("bad request: {}", text))),
                401 => Err(FixError::InvalidRequest(format!("unauthorized: {}", text))),
                403 => Err(FixError::InvalidRequest(format!("forbidden: {}", text))),
                404 => Err(FixError::InvalidRequest(format!("not found: {}", text))),
                429 => Err(FixError::RateLimited(text)),
                500 | 502 | 503 | 504 => Err(FixError::Server(format!("({}): {}", status, text))),
                _ => Err(FixError::Unknown(format!("({}): {}", status, text))),
            };
        }

        match response.json::<ChatCompletionResponse>().await {
            Ok(data) => {
                if let Some(usage) = &data.usage {
                    log::info!("fix request completed, used {} tokens", usage.total_tokens);
                }
                match data.choices.first() {
                    Some(choice) => Ok(choice.message.content.clone()),
                    None => Err(FixError::Parse("no choices returned in response".to_string())),
                }
            }
            Err(err) => Err(FixError::Parse(format!("failed to parse response: {}", err))),
        }
    }
}

#[async_trait]
impl FixProvider for FixClient {
    /// Ask the LLM for a corrected document.
    ///
    /// Retries transient failures with capped exponential backoff and
    /// jitter; any terminal failure means fixing is unavailable and the
    /// caller stops its own retry loop.
    async fn request_fix(&self, source: &str, error_message: &str) -> Result<String, FixError> {
        if !self.is_configured() {
            return Err(FixError::NotConfigured("LLM_API_KEY is not set".to_string()));
        }

        let request_body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_user_prompt(source, error_message),
                },
            ],
            temperature: Some(FIX_TEMPERATURE),
            max_tokens: Some(FIX_MAX_TOKENS),
        };

        log::info!(
            "requesting fix from {} (model: {})",
            self.api_url,
            self.model
        );

        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if attempt > 1 {
                log::info!("retry attempt {} for fix request", attempt);
            }

            match self.execute_request(&request_body).await {
                Ok(text) => return Ok(strip_code_fences(&text)),
                Err(err) => {
                    if !is_retryable(&err) || attempt > self.max_retries {
                        log::error!("fix request failed after {} attempt(s): {}", attempt, err);
                        return Err(err);
                    }

                    if let Some(delay) = backoff.next_backoff() {
                        log::warn!("retryable error: {}. retrying in {:?}", err, delay);
                        let jitter = rand::thread_rng().gen_range(0..=200);
                        tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                    } else {
                        log::error!("exceeded maximum backoff time: {}", err);
                        return Err(err);
                    }
                }
            }
        }
    }
}

pub(crate) fn build_user_prompt(source: &str, error_message: &str) -> String {
    format!(
        "The following LaTeX document failed to compile.\n\n\
         Error: {}\n\n\
         Document:\n{}\n\n\
         Return the full corrected document.",
        error_message, source
    )
}

/// Strip surrounding whitespace and a leading/trailing markdown code fence
/// (with or without a language tag) from a model response.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let mut lines: Vec<&str> = trimmed.lines().collect();

    if lines
        .first()
        .map_or(false, |line| line.trim_start().starts_with("```"))
    {
        lines.remove(0);
    }
    if lines.last().map_or(false, |line| line.trim() == "```") {
        lines.pop();
    }

    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences_with_language_tag() {
        let text = "```latex\n\\documentclass{article}\n\\begin{document}\nhi\n\\end{document}\n```";
        assert_eq!(
            strip_code_fences(text),
            "\\documentclass{article}\n\\begin{document}\nhi\n\\end{document}"
        );
    }

    #[test]
    fn test_strip_code_fences_plain() {
        assert_eq!(strip_code_fences("```\nabc\n```"), "abc");
    }

    #[test]
    fn test_strip_code_fences_no_fences() {
        assert_eq!(strip_code_fences("  \\documentclass{article}\n"), "\\documentclass{article}");
    }

    #[test]
    fn test_user_prompt_embeds_error_and_source() {
        let prompt = build_user_prompt("\\documentclass{article}", "some canned message");
        assert!(prompt.contains("some canned message"));
        assert!(prompt.contains("\\documentclass{article}"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&FixError::Server("boom".to_string())));
        assert!(is_retryable(&FixError::Network("down".to_string())));
        assert!(is_retryable(&FixError::RateLimited("slow down".to_string())));
        assert!(!is_retryable(&FixError::InvalidRequest("bad".to_string())));
        assert!(!is_retryable(&FixError::Parse("bad json".to_string())));
        assert!(!is_retryable(&FixError::NotConfigured("no key".to_string())));
        assert!(!is_retryable(&FixError::Unknown("teapot".to_string())));
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        std::env::remove_var("LLM_API_KEY");
        let client = FixClient::from_env();
        let result = client.request_fix("\\documentclass{article}", "error").await;
        assert!(matches!(result, Err(FixError::NotConfigured(_))));
    }
}
