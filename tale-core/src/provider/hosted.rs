//! Hosted model list with quota fallback.

use super::{ChatSession, HostedConfig, Provider, ProviderError, ProviderKind, ProviderStream};
use async_trait::async_trait;
use chat_client::{ChatMessage, ChatRequest, HostedClient};
use futures::StreamExt;

pub const DEFAULT_MODELS: [&str; 3] = [
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
];
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

const NARRATION_TEMPERATURE: f32 = 0.9;

pub struct HostedProvider {
    client: HostedClient,
    models: Vec<String>,
    current: usize,
    embedding_model: String,
}

impl HostedProvider {
    pub fn new(config: &HostedConfig) -> Self {
        let mut client = HostedClient::new(config.api_key.clone()).with_safety(config.safety);
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url.clone());
        }
        Self {
            client,
            models: config.models.clone(),
            current: 0,
            embedding_model: config.embedding_model.clone(),
        }
    }

    /// The model id currently in use.
    pub fn model(&self) -> &str {
        self.models
            .get(self.current)
            .map(String::as_str)
            .unwrap_or(DEFAULT_MODELS[0])
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }
}

#[async_trait]
impl Provider for HostedProvider {
    fn name(&self) -> String {
        format!("hosted:{}", self.model())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Hosted
    }

    async fn send_message_stream(
        &self,
        chat: &ChatSession,
        prompt: &str,
    ) -> Result<ProviderStream, ProviderError> {
        let mut messages = chat.history.clone();
        messages.push(ChatMessage::user(prompt));
        let request = ChatRequest::new(messages)
            .with_system(chat.system_instruction.clone())
            .with_temperature(NARRATION_TEMPERATURE);

        let model = self.model().to_string();
        let stream = self
            .client
            .stream_generate(&model, &request)
            .await
            .map_err(|e| ProviderError::from_client(e, &model))?;

        Ok(Box::pin(stream.map(move |item| {
            item.map_err(|e| ProviderError::from_client(e, &model))
        })))
    }

    async fn generate_json(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_system(system)
            .with_json_output();
        let model = self.model();
        self.client
            .generate(model, &request)
            .await
            .map_err(|e| ProviderError::from_client(e, model))
    }

    fn use_next_model(&mut self) -> bool {
        if self.current + 1 < self.models.len() {
            self.current += 1;
            tracing::info!(model = %self.model(), "switched to fallback model");
            true
        } else {
            false
        }
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    async fn batch_embed_contents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.client
            .batch_embed(&self.embedding_model, texts)
            .await
            .map_err(|e| ProviderError::from_client(e, &self.embedding_model))
    }
}
