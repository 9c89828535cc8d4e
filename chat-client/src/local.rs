//! Client for a local OpenAI-compatible chat-completion server.

use crate::{check_status, http_client, sse, ChatRequest, Error, Role, TextStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";
const DEFAULT_MODEL: &str = "local-model";

#[derive(Clone)]
pub struct LocalClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl Default for LocalClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl LocalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(300)),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Stream a reply as text fragments.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<TextStream, Error> {
        let response = self.send(request, true).await?;
        Ok(sse::text_stream(response.bytes_stream(), extract_delta))
    }

    /// Generate a complete reply in one request.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String, Error> {
        let response = self.send(request, false).await?;
        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        reply_text(api_response)
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, Error> {
        let url = self.endpoint();
        let response = self
            .client
            .post(&url)
            .json(&self.build_api_request(request, stream))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::Connect {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                } else {
                    Error::Network(e.to_string())
                }
            })?;
        check_status(response).await
    }

    fn build_api_request(&self, request: &ChatRequest, stream: bool) -> ApiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(|m| ApiMessage {
            role: match m.role {
                Role::User => "user",
                Role::Model => "assistant",
            }
            .to_string(),
            content: m.text.clone(),
        }));

        ApiRequest {
            model: self.model.clone(),
            messages,
            stream,
            temperature: request.temperature,
        }
    }
}

/// Text of the first choice. A null `content` reads as an empty reply.
fn reply_text(response: ApiResponse) -> Result<String, Error> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .map(|m| m.content.unwrap_or_default())
        .ok_or_else(|| Error::Parse("response has no choices".to_string()))
}

fn extract_delta(payload: &str) -> Result<Option<String>, Error> {
    let chunk: ApiStreamChunk = serde_json::from_str(payload)
        .map_err(|e| Error::Parse(format!("SSE parse error: {e}")))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content))
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    message: Option<ApiReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChoice {
    #[serde(default)]
    delta: Option<ApiDelta>,
}

#[derive(Debug, Deserialize)]
struct ApiDelta {
    #[serde(default)]
    content: Option<String>,
}
