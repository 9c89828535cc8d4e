//! Local OpenAI-compatible chat server.

use super::{ChatSession, LocalConfig, Provider, ProviderError, ProviderKind, ProviderStream};
use async_trait::async_trait;
use chat_client::{ChatMessage, ChatRequest, LocalClient};
use futures::StreamExt;

pub const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";
pub const DEFAULT_MODEL: &str = "local-model";
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

pub struct LocalProvider {
    client: LocalClient,
    history_window: usize,
}

impl LocalProvider {
    pub fn new(config: &LocalConfig) -> Self {
        Self {
            client: LocalClient::new(config.base_url.clone()).with_model(config.model.clone()),
            history_window: config.history_window,
        }
    }

    /// The last `history_window` messages of the chat followed by `prompt`.
    /// The system instruction travels separately and is always kept.
    pub fn windowed_request(&self, chat: &ChatSession, prompt: &str) -> ChatRequest {
        let keep = self.history_window.saturating_sub(1);
        let skip = chat.history.len().saturating_sub(keep);
        let mut messages: Vec<ChatMessage> = chat.history[skip..].to_vec();
        messages.push(ChatMessage::user(prompt));
        ChatRequest::new(messages).with_system(chat.system_instruction.clone())
    }

    fn classify(&self, err: chat_client::Error) -> ProviderError {
        match err {
            chat_client::Error::Connect { url, message } => {
                ProviderError::LocalServerUnavailable(unavailable_diagnostic(&url, &message))
            }
            other => ProviderError::from_client(other, self.client.model()),
        }
    }
}

/// Actionable text for a local server that could not be reached.
pub fn unavailable_diagnostic(url: &str, cause: &str) -> String {
    format!(
        "Could not reach the local model server at {url} ({cause}). \
         Check that the server is running and a model is loaded, \
         that the address and port match its settings, \
         and, if requests pass through a browser or proxy, \
         that it allows cross-origin (CORS) requests."
    )
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> String {
        format!("local:{}", self.client.model())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn send_message_stream(
        &self,
        chat: &ChatSession,
        prompt: &str,
    ) -> Result<ProviderStream, ProviderError> {
        let request = self.windowed_request(chat, prompt);
        let stream = self
            .client
            .stream_chat(&request)
            .await
            .map_err(|e| self.classify(e))?;

        let model = self.client.model().to_string();
        Ok(Box::pin(stream.map(move |item| {
            item.map_err(|e| ProviderError::from_client(e, &model))
        })))
    }

    async fn generate_json(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_system(system)
            .with_json_output();
        self.client
            .chat(&request)
            .await
            .map_err(|e| self.classify(e))
    }

    /// A local server runs one model; there is nothing to fall back to.
    fn use_next_model(&mut self) -> bool {
        false
    }

    fn supports_embeddings(&self) -> bool {
        false
    }

    async fn batch_embed_contents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::EmbeddingsUnsupported(self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_with(turns: usize) -> ChatSession {
        let mut chat = ChatSession {
            system_instruction: "You narrate.".into(),
            history: Vec::new(),
        };
        for i in 0..turns {
            chat.record_exchange(&format!("prompt {i}"), &format!("reply {i}"));
        }
        chat
    }

    #[test]
    fn test_window_keeps_recent_and_system() {
        let provider = LocalProvider::new(&LocalConfig::default().with_history_window(5));
        let request = provider.windowed_request(&chat_with(10), "now");

        assert_eq!(request.system.as_deref(), Some("You narrate."));
        assert_eq!(request.messages.len(), 5);
        assert_eq!(request.messages[0].text, "prompt 8");
        assert_eq!(request.messages[3].text, "reply 9");
        assert_eq!(request.messages[4].text, "now");
    }

    #[test]
    fn test_short_history_sent_whole() {
        let provider = LocalProvider::new(&LocalConfig::default());
        let request = provider.windowed_request(&chat_with(2), "now");
        assert_eq!(request.messages.len(), 5);
    }

    #[test]
    fn test_connect_error_is_diagnosed() {
        let provider = LocalProvider::new(&LocalConfig::default());
        let err = provider.classify(chat_client::Error::Connect {
            url: "http://localhost:1234/v1/chat/completions".into(),
            message: "connection refused".into(),
        });
        match err {
            ProviderError::LocalServerUnavailable(text) => {
                assert!(text.contains("localhost:1234"));
                assert!(text.contains("running"));
                assert!(text.contains("CORS"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_no_fallback_or_embeddings() {
        let mut provider = LocalProvider::new(&LocalConfig::default());
        assert!(!provider.use_next_model());
        assert!(!provider.supports_embeddings());
        let err = provider
            .batch_embed_contents(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmbeddingsUnsupported(_)));
    }
}
