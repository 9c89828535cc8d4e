//! Client for a hosted generative-language REST API.

use crate::{check_status, http_client, sse, ChatRequest, Error, Role, TextStream};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Blocking threshold applied to every harm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyThreshold {
    BlockNone,
    BlockOnlyHigh,
    #[default]
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

impl SafetyThreshold {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            SafetyThreshold::BlockNone => "BLOCK_NONE",
            SafetyThreshold::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            SafetyThreshold::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            SafetyThreshold::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
        }
    }

    /// Parse a short configuration name such as `only_high`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "none" | "block_none" => Some(SafetyThreshold::BlockNone),
            "only_high" | "block_only_high" => Some(SafetyThreshold::BlockOnlyHigh),
            "medium_and_above" | "block_medium_and_above" => {
                Some(SafetyThreshold::BlockMediumAndAbove)
            }
            "low_and_above" | "block_low_and_above" => Some(SafetyThreshold::BlockLowAndAbove),
            _ => None,
        }
    }
}

/// Hosted model client. The model id is chosen per call so the caller can
/// walk a fallback list.
#[derive(Clone)]
pub struct HostedClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    safety: SafetyThreshold,
}

impl HostedClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(120)),
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            safety: SafetyThreshold::default(),
        }
    }

    /// Create a client from the TALE_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("TALE_API_KEY").map_err(|_| Error::NoApiKey)?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_safety(mut self, safety: SafetyThreshold) -> Self {
        self.safety = safety;
        self
    }

    pub fn safety(&self) -> SafetyThreshold {
        self.safety
    }

    /// Stream a reply as text fragments.
    pub async fn stream_generate(
        &self,
        model: &str,
        request: &ChatRequest,
    ) -> Result<TextStream, Error> {
        let url = format!(
            "{}/models/{model}:streamGenerateContent?alt=sse",
            self.base_url
        );
        let response = self
            .client
            .post(url)
            .headers(self.build_headers()?)
            .json(&self.build_api_request(request))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let response = check_status(response).await?;

        Ok(sse::text_stream(response.bytes_stream(), extract_text))
    }

    /// Generate a complete reply in one request.
    pub async fn generate(&self, model: &str, request: &ChatRequest) -> Result<String, Error> {
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        let response = self
            .client
            .post(url)
            .headers(self.build_headers()?)
            .json(&self.build_api_request(request))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        api_response.into_text()
    }

    /// Embed each text with `model`, returning one vector per input.
    pub async fn batch_embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        let url = format!("{}/models/{model}:batchEmbedContents", self.base_url);
        let body = ApiEmbedRequest {
            requests: texts
                .iter()
                .map(|text| ApiEmbedContent {
                    model: format!("models/{model}"),
                    content: ApiContent {
                        role: None,
                        parts: vec![ApiPart { text: text.clone() }],
                    },
                })
                .collect(),
        };

        let response = self
            .client
            .post(url)
            .headers(self.build_headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let api_response: ApiEmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(api_response
            .embeddings
            .into_iter()
            .map(|e| e.values)
            .collect())
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        if self.api_key.is_empty() {
            return Err(Error::NoApiKey);
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request(&self, request: &ChatRequest) -> ApiRequest {
        ApiRequest {
            system_instruction: request.system.as_ref().map(|system| ApiContent {
                role: None,
                parts: vec![ApiPart {
                    text: system.clone(),
                }],
            }),
            contents: request
                .messages
                .iter()
                .map(|m| ApiContent {
                    role: Some(
                        match m.role {
                            Role::User => "user",
                            Role::Model => "model",
                        }
                        .to_string(),
                    ),
                    parts: vec![ApiPart {
                        text: m.text.clone(),
                    }],
                })
                .collect(),
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| ApiSafetySetting {
                    category: category.to_string(),
                    threshold: self.safety.as_api_str().to_string(),
                })
                .collect(),
            generation_config: ApiGenerationConfig {
                temperature: request.temperature,
                response_mime_type: request
                    .json_output
                    .then(|| "application/json".to_string()),
            },
        }
    }
}

/// Pull the text delta out of one streamed payload.
fn extract_text(payload: &str) -> Result<Option<String>, Error> {
    let chunk: ApiResponse = serde_json::from_str(payload)
        .map_err(|e| Error::Parse(format!("SSE parse error: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(Error::Api {
            status: error.code.unwrap_or(500),
            message: error.message,
        });
    }
    Ok(Some(chunk.joined_text()))
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    contents: Vec<ApiContent>,
    safety_settings: Vec<ApiSafetySetting>,
    generation_config: ApiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ApiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct ApiSafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
    #[serde(default)]
    error: Option<ApiError>,
}

impl ApiResponse {
    fn joined_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn into_text(self) -> Result<String, Error> {
        if self.candidates.is_empty() {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(Error::Parse(format!("response blocked: {reason}")));
        }
        Ok(self.joined_text())
    }
}

#[derive(Debug, Deserialize)]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct ApiEmbedRequest {
    requests: Vec<ApiEmbedContent>,
}

#[derive(Debug, Serialize)]
struct ApiEmbedContent {
    model: String,
    content: ApiContent,
}

#[derive(Debug, Deserialize)]
struct ApiEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ApiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ApiEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}
