//! LLM client for mapping proposals.
//!
//! The client is behind the [`MappingModel`] trait so the proposer can run
//! against the HTTP implementation, a disabled stub, or a test mock. The
//! HTTP client speaks the OpenAI-compatible chat-completions protocol in
//! JSON mode and rate-limits itself with a semaphore plus a minimum
//! inter-request interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};

use crate::config::LlmConfig;
use crate::error::{MigrateError, Result};

/// A model that can complete a mapping prompt.
#[async_trait]
pub trait MappingModel: Send + Sync {
    /// Identifier used in logs and draft metadata.
    fn name(&self) -> &str;

    /// Complete a system + user prompt pair, returning the raw response
    /// text (expected to be a JSON object).
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Rate-limited HTTP client for an OpenAI-compatible endpoint.
pub struct HttpMappingModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    limiter: Arc<Semaphore>,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpMappingModel {
    pub fn new(config: &LlmConfig) -> Self {
        let rpm = config.requests_per_minute.max(1);
        Self {
            client: reqwest::Client::new(),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            limiter: Arc::new(Semaphore::new(config.propose_parallelism.max(1))),
            min_interval: Duration::from_millis(u64::from(60_000 / rpm).max(10)),
            last_request: Mutex::new(None),
        }
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl std::fmt::Debug for HttpMappingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMappingModel")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl MappingModel for HttpMappingModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| MigrateError::Llm(format!("rate limiter closed: {}", e)))?;
        self.throttle().await;

        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MigrateError::Llm(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MigrateError::Llm(format!(
                "provider returned {}: {}",
                status,
                detail.chars().take(500).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| MigrateError::Llm(format!("unparseable response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| MigrateError::Llm("response contained no choices".into()))
    }
}

/// Stand-in used when `llm.enabled = false`: every call fails over to the
/// deterministic rule-based mapping.
#[derive(Debug, Default)]
pub struct DisabledModel;

#[async_trait]
impl MappingModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(MigrateError::Llm("llm disabled by configuration".into()))
    }
}

/// Build the configured model.
pub fn build_model(config: &LlmConfig) -> Arc<dyn MappingModel> {
    if config.enabled {
        Arc::new(HttpMappingModel::new(config))
    } else {
        Arc::new(DisabledModel)
    }
}
