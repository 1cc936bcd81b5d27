//! OpenAI-compatible HTTP completion client.
//!
//! Supports any server implementing the OpenAI chat completions API:
//! - LM Studio (`http://localhost:1234`)
//! - Ollama (`http://localhost:11434`)
//! - vLLM, llama.cpp server, etc.

use super::{ChatMessage, CompletionClient, CompletionError};
use crate::config::LlmConfig;
use crate::error::{DialogueError, Result};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

/// Completion client speaking `POST /v1/chat/completions`.
///
/// Non-streaming, single attempt per call. The request timeout bounds the
/// whole round trip, including reading the body.
pub struct ApiCompletionClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for ApiCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCompletionClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ApiCompletionClient {
    /// Create a client from the `[llm]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DialogueError::Config(format!("failed to build HTTP client: {e}")))?;

        let base_url = base_url(&config.api_url);
        info!("completion backend configured: {base_url} model={}", config.api_model);

        Ok(Self {
            client,
            base_url,
            model: config.api_model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Server root without the `/v1` suffix.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// List the model ids served by the backend (`GET /v1/models`).
    ///
    /// # Errors
    ///
    /// Same mapping as [`CompletionClient::complete`].
    pub async fn list_models(&self) -> std::result::Result<Vec<String>, CompletionError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| unreachable_error(&url, &e))?;

        let value = read_json(&url, response).await?;
        let data = value["data"].as_array().ok_or_else(|| {
            CompletionError::MalformedResponse("models response missing `data` array".to_owned())
        })?;

        Ok(data
            .iter()
            .filter_map(|m| m["id"].as_str().map(str::to_owned))
            .collect())
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }
}

#[async_trait]
impl CompletionClient for ApiCompletionClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
    ) -> std::result::Result<String, CompletionError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": false,
        });

        debug!(messages = messages.len(), "sending completion request");
        let started = Instant::now();

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| unreachable_error(&url, &e))?;

        let value = read_json(&url, response).await?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                CompletionError::MalformedResponse(
                    "response missing choices[0].message.content".to_owned(),
                )
            })?;

        let reply = strip_think_blocks(content).trim().to_owned();
        if reply.is_empty() {
            return Err(CompletionError::MalformedResponse(
                "backend returned an empty reply".to_owned(),
            ));
        }

        info!(
            "completion received in {:.1}s ({} chars)",
            started.elapsed().as_secs_f64(),
            reply.len()
        );
        Ok(reply)
    }
}

/// Read a response body as JSON, mapping status and parse failures.
async fn read_json(
    url: &str,
    response: reqwest::Response,
) -> std::result::Result<serde_json::Value, CompletionError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| unreachable_error(url, &e))?;

    if !status.is_success() {
        return Err(CompletionError::BackendRejected {
            status: status.as_u16(),
            body: extract_error_message(&text),
        });
    }

    serde_json::from_str(&text)
        .map_err(|e| CompletionError::MalformedResponse(format!("invalid JSON body: {e}")))
}

fn unreachable_error(url: &str, err: &reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        CompletionError::BackendUnreachable(format!("request to {url} timed out"))
    } else {
        CompletionError::BackendUnreachable(format!("request to {url} failed: {err}"))
    }
}

/// Extract an error message from an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

/// Normalise a configured URL to the server root.
///
/// Accepts `http://host:1234`, `http://host:1234/v1`, and trailing slashes.
pub(crate) fn base_url(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    let base = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
    base.trim_end_matches('/').to_owned()
}

/// Remove `<think>...</think>` reasoning blocks some local models emit.
///
/// An unterminated block hides everything after its opening tag.
fn strip_think_blocks(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut visible = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        visible.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        match after_open.find(CLOSE) {
            Some(end) => rest = &after_open[end + CLOSE.len()..],
            None => return visible,
        }
    }
    visible.push_str(rest);
    visible
}
