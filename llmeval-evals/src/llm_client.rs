// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Backend clients for LLM-as-judge completions and text embeddings

use async_trait::async_trait;
use llmeval_core::Retryable;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// One judge prompt addressed to a specific model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl JudgeRequest {
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            temperature: 0.0,
            max_tokens: 1024,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Raw completion returned by a judge backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Errors from judge backends
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("API error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Retryable for LLMError {
    /// 4xx responses other than 429 are permanent
    fn is_retryable(&self) -> bool {
        match self {
            LLMError::Status { status, .. } => *status >= 500,
            _ => true,
        }
    }
}

/// Errors from embedding clients
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure of a load shared by concurrent cache lookups
    #[error("{0}")]
    Shared(std::sync::Arc<EmbedError>),
}

/// Chat-completion backend used by the judge metric
#[async_trait]
pub trait JudgeClient: Send + Sync {
    async fn complete(&self, request: &JudgeRequest) -> Result<JudgeResponse, LLMError>;

    /// Provider name this client is registered under (e.g. "openai")
    fn provider(&self) -> &str;
}

/// Trait for embedding clients used by similarity metrics
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single text string
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError>;

    /// Embed a batch of texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LLMError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LLMError::RateLimitExceeded);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LLMError::Status {
        status: status.as_u16(),
        body,
    })
}

fn non_empty_content(content: Option<&str>) -> Result<String, LLMError> {
    match content {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        Some(_) => Err(LLMError::InvalidResponse("Empty content".to_string())),
        None => Err(LLMError::InvalidResponse("Missing content".to_string())),
    }
}

fn usage_field(usage: &Value, key: &str) -> u32 {
    usage[key].as_u64().unwrap_or(0) as u32
}

/// OpenAI client: chat completions for judging, `/embeddings` for similarity
pub struct OpenAIClient {
    api_key: String,
    embedding_model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }
}

#[async_trait]
impl JudgeClient for OpenAIClient {
    async fn complete(&self, request: &JudgeRequest) -> Result<JudgeResponse, LLMError> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_data: Value = check_status(response).await?.json().await?;
        let content =
            non_empty_content(response_data["choices"][0]["message"]["content"].as_str())?;

        let usage_data = &response_data["usage"];
        let usage = TokenUsage {
            prompt_tokens: usage_field(usage_data, "prompt_tokens"),
            completion_tokens: usage_field(usage_data, "completion_tokens"),
            total_tokens: usage_field(usage_data, "total_tokens"),
        };
        debug!(model = %request.model, tokens = usage.total_tokens, "OpenAI judge completion");

        Ok(JudgeResponse {
            content,
            usage,
            model: request.model.clone(),
        })
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIClient {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::ApiError("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        let request = serde_json::json!({
            "model": self.embedding_model,
            "input": texts
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(EmbedError::RateLimitExceeded);
            }
            return Err(EmbedError::ApiError(error_text));
        }

        let response_data: Value = response.json().await?;

        let mut embeddings = Vec::new();
        if let Some(data) = response_data["data"].as_array() {
            for item in data {
                if let Some(embedding_vec) = item["embedding"].as_array() {
                    let vec: Vec<f64> = embedding_vec.iter().filter_map(|v| v.as_f64()).collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != texts.len() {
            return Err(EmbedError::ApiError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }
}

/// Anthropic Claude client implementation
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl JudgeClient for AnthropicClient {
    async fn complete(&self, request: &JudgeRequest) -> Result<JudgeResponse, LLMError> {
        let body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": [
                { "role": "user", "content": request.user }
            ],
            "system": request.system,
            "temperature": request.temperature
        });

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_data: Value = check_status(response).await?.json().await?;
        let content = non_empty_content(response_data["content"][0]["text"].as_str())?;

        let usage_data = &response_data["usage"];
        let prompt_tokens = usage_field(usage_data, "input_tokens");
        let completion_tokens = usage_field(usage_data, "output_tokens");
        let usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        };
        debug!(model = %request.model, tokens = usage.total_tokens, "Anthropic judge completion");

        Ok(JudgeResponse {
            content,
            usage,
            model: request.model.clone(),
        })
    }

    fn provider(&self) -> &str {
        "anthropic"
    }
}
