//! OpenRouter API client — the generative vision/text model collaborator.
//!
//! One client instance is shared across requests; a semaphore bounds
//! in-flight completions to the backend's concurrency limit instead of
//! locking anything globally.

use crate::error::{ExtractError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// OpenRouter client for chat completions.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    model: String,
    permits: Arc<Semaphore>,
}

impl OpenRouterClient {
    pub fn new(client: Client, api_key: String, model: String, concurrency: usize) -> Self {
        Self {
            client,
            api_key,
            model,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Send a chat completion request and return the message content.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(16384),
        };

        // Throttle against the provider's rate limits.
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExtractError::ModelError("model client shut down".into()))?;

        debug!("Sending request to OpenRouter: model={}", request.model);

        let response = self
            .client
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::ModelError(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractError::ModelError(format!(
                "OpenRouter API error ({status}): {error_text}"
            )));
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::ModelError(format!("malformed response: {e}")))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExtractError::ModelError("response has no content".into()))?;

        info!(
            "OpenRouter response: {} tokens (prompt: {}, completion: {})",
            response.usage.total_tokens,
            response.usage.prompt_tokens,
            response.usage.completion_tokens
        );

        Ok(content)
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message with text and PNG page images.
    pub fn user_with_images<'a>(
        text: impl Into<String>,
        images: impl IntoIterator<Item = &'a [u8]>,
    ) -> Self {
        let mut parts = vec![ContentPart::Text { text: text.into() }];

        for image_data in images {
            let data_url = format!("data:image/png;base64,{}", BASE64.encode(image_data));
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url: data_url },
            });
        }

        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}
