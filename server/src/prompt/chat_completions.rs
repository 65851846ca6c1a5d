use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    rate_limiters::RateLimiters,
    server_config::ModelConfig,
    HttpClient,
};

/// One structured-generation call.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub system: String,
    pub user_content: String,
    /// Optional `response_format` override; `json_object` is used otherwise.
    pub response_format: Option<serde_json::Value>,
}

/// External capability turning a prompt into the raw text of a model reply.
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    async fn generate(&self, request: &ExtractionRequest) -> AppResult<String>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ModelLength,
    Error,
    ToolCalls,
    ContentFilter,
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<PromptUsage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
    Wrapped { error: ChatApiError },
}

/// OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatCompletionsEngine {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
    endpoint: String,
    api_key: String,
    model_id: String,
    temperature: f64,
}

impl ChatCompletionsEngine {
    pub fn new(
        http_client: HttpClient,
        rate_limiters: RateLimiters,
        model: &ModelConfig,
        api_key: &str,
    ) -> Self {
        Self {
            http_client,
            rate_limiters,
            endpoint: model.endpoint.clone(),
            api_key: api_key.to_string(),
            model_id: model.id.clone(),
            temperature: model.temperature,
        }
    }

    fn body(&self, request: &ExtractionRequest) -> serde_json::Value {
        let response_format = request
            .response_format
            .clone()
            .unwrap_or_else(|| json!({ "type": "json_object" }));
        json!(
          {
            "model": &self.model_id,
            "temperature": self.temperature,
            "messages": [
              {
                "role": "system",
                "content": &request.system
              },
              {
                "role": "user",
                "content": &request.user_content
              }
            ],
            "response_format": response_format
          }
        )
    }
}

#[async_trait]
impl ExtractionEngine for ChatCompletionsEngine {
    async fn generate(&self, request: &ExtractionRequest) -> AppResult<String> {
        self.rate_limiters.acquire_one().await;

        let resp = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limiters.trigger_backoff();
            tracing::warn!("Chat API rate limited, {}", self.rate_limiters.get_status());
            return Err(AppError::TooManyRequests);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Chat API returned {}: {}", status, body).into());
        }

        let resp = resp.json::<serde_json::Value>().await?;
        let parsed = serde_json::from_value::<ChatApiResponseOrError>(resp.clone())
            .context(format!("Could not parse chat response: {}", resp))?;

        let parsed = match parsed {
            ChatApiResponseOrError::Response(parsed) => parsed,
            ChatApiResponseOrError::Error(error) | ChatApiResponseOrError::Wrapped { error } => {
                if error.message == "Requests rate limit exceeded" {
                    self.rate_limiters.trigger_backoff();
                    tracing::warn!("Chat API rate limited, {}", self.rate_limiters.get_status());
                }
                return Err(anyhow!("Chat API error: {:?}", error).into());
            }
        };

        first_choice_content(parsed)
    }
}

fn first_choice_content(parsed: ChatApiResponse) -> AppResult<String> {
    if let Some(usage) = &parsed.usage {
        tracing::debug!(
            "Chat usage: prompt={} completion={}",
            usage.prompt_tokens,
            usage.completion_tokens
        );
    }

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Chat response has no choices"))?;

    if let Some(reason) = &choice.finish_reason {
        if *reason != FinishReason::Stop {
            tracing::warn!("Chat completion finished with {:?}", reason);
        }
    }

    choice
        .message
        .content
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("Chat response content is blank").into())
}
