pub mod batch;
pub mod suggester;

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ModelConfig;
use crate::error::{ResolveError, Result};
use crate::ratelimit::RateLimiter;

pub use batch::{BatchPlanner, FileRequest};
pub use suggester::{ModelOutput, ModelSuggester};

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").unwrap());

static EMPTY_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(year|season|episode)"\s*:\s*"""#).unwrap());

/// Sampling knobs for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A model used purely as a structured-JSON oracle.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// `schema` is an example of the expected shape; `Value::Null` means no hint.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// OpenAI-compatible `/chat/completions` endpoint in JSON mode.
pub struct OpenAiModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    limiter: RateLimiter,
}

impl OpenAiModel {
    pub fn new(config: &ModelConfig, limiter: RateLimiter) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            limiter,
        })
    }
}

#[async_trait]
impl GenerativeModel for OpenAiModel {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        self.limiter.acquire(cancel).await?;

        let mut content = format!("{prompt}\n\n请以JSON格式返回结果。");
        if !schema.is_null() {
            content.push_str(&format!("\nJSON结构示例: {schema}"));
        }
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };
        debug!(model = %self.model, temperature = options.temperature, max_tokens = options.max_tokens, "model request");

        let url = format!("{}/chat/completions", self.base_url);
        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            response = send => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "model request failed");
            return Err(ResolveError::Upstream(format!("模型服务返回 {status}: {body}")));
        }

        let response: ChatResponse = response.json().await?;
        let Some(choice) = response.choices.into_iter().next() else {
            return Err(ResolveError::Upstream("模型响应中没有 choices".to_string()));
        };
        if let Some(usage) = &response.usage {
            info!(
                finish_reason = ?choice.finish_reason,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "model response received"
            );
        }

        parse_json_reply(&choice.message.content)
    }
}

/// Strip markdown fences and surrounding chatter, then parse the first JSON object.
pub fn parse_json_reply(raw: &str) -> Result<serde_json::Value> {
    let mut content = raw.trim();
    content = content
        .strip_prefix("```json")
        .or_else(|| content.strip_prefix("```"))
        .unwrap_or(content)
        .trim();
    content = content.strip_suffix("```").unwrap_or(content).trim();

    let object = JSON_OBJECT
        .find(content)
        .map(|m| m.as_str())
        .ok_or_else(|| ResolveError::Upstream(format!("模型未返回 JSON 对象: {raw}")))?;
    let normalized = EMPTY_NUMBER.replace_all(object, "\"$1\": null");
    Ok(serde_json::from_str(&normalized)?)
}
