//! Model providers.
//!
//! [`Provider`] is the seam the turn machine is generic over. Production code
//! uses [`GameProvider`], a closed choice between a hosted model list and a
//! local OpenAI-compatible server picked once at session creation. Tests use
//! the scripted provider in [`crate::testing`].
//!
//! Provider calls make a single attempt. Resilience lives with the callers:
//! [`retry::with_backoff`] retries rate limits, and quota exhaustion is
//! answered by [`Provider::use_next_model`] plus a fresh chat session.

pub mod hosted;
pub mod local;
pub mod retry;
pub mod sheet;

pub use hosted::HostedProvider;
pub use local::LocalProvider;
pub use retry::{with_backoff, RetryPolicy};
pub use sheet::{create_character_sheet, create_story_hooks, CharacterSheet};

use crate::character::{CharacterInfo, PlayerState};
use crate::json_recovery::MalformedResponse;
use crate::prompts;
use crate::session::{EntryRole, TranscriptEntry};
use async_trait::async_trait;
use chat_client::{ChatMessage, SafetyThreshold};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Reply fragments from one streamed chat turn.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Errors from model providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    MalformedResponse(#[from] MalformedResponse),

    #[error("Rate limited: {0}")]
    Transient(String),

    #[error("Quota exceeded for {model}: {message}")]
    QuotaExceeded { model: String, message: String },

    #[error("All configured models are exhausted")]
    ProvidersExhausted,

    #[error("No complete response within {0:?}")]
    StreamTimeout(Duration),

    #[error("{0}")]
    LocalServerUnavailable(String),

    #[error("{0} does not support embeddings")]
    EmbeddingsUnsupported(String),

    #[error("Provider request failed: {0}")]
    Request(#[source] chat_client::Error),
}

impl ProviderError {
    /// Classify a client error raised while talking to `model`.
    ///
    /// HTTP 429 mentioning a quota means the model is used up for now; any
    /// other 429 is a transient rate limit.
    pub fn from_client(err: chat_client::Error, model: &str) -> Self {
        match &err {
            chat_client::Error::Api {
                status: 429,
                message,
            } => {
                if message.to_lowercase().contains("quota") {
                    ProviderError::QuotaExceeded {
                        model: model.to_string(),
                        message: message.clone(),
                    }
                } else {
                    ProviderError::Transient(message.clone())
                }
            }
            _ => ProviderError::Request(err),
        }
    }

    /// Whether switching to the next model could help.
    pub fn is_quota(&self) -> bool {
        matches!(self, ProviderError::QuotaExceeded { .. })
    }
}

/// System instruction plus prior conversation for one chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSession {
    pub system_instruction: String,
    pub history: Vec<ChatMessage>,
}

impl ChatSession {
    /// Build from transcript entries, merging consecutive turns by the same
    /// author so back ends that require alternation accept the history.
    pub fn new(system_instruction: String, entries: &[TranscriptEntry]) -> Self {
        let mut history: Vec<ChatMessage> = Vec::with_capacity(entries.len());
        for entry in entries {
            let role = match entry.role {
                EntryRole::User => chat_client::Role::User,
                EntryRole::Model => chat_client::Role::Model,
            };
            match history.last_mut() {
                Some(last) if last.role == role => {
                    last.text.push_str("\n\n");
                    last.text.push_str(&entry.text);
                }
                _ => history.push(ChatMessage {
                    role,
                    text: entry.text.clone(),
                }),
            }
        }
        Self {
            system_instruction,
            history,
        }
    }

    pub fn record_exchange(&mut self, prompt: &str, reply: &str) {
        self.history.push(ChatMessage::user(prompt));
        self.history.push(ChatMessage::model(reply));
    }
}

/// A language-model back end.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable name of the model currently in use.
    fn name(&self) -> String;

    fn kind(&self) -> ProviderKind;

    fn create_chat_session(
        &self,
        info: &CharacterInfo,
        player: &PlayerState,
        mature: bool,
        history: &[TranscriptEntry],
    ) -> ChatSession {
        ChatSession::new(prompts::system_instruction(info, player, mature), history)
    }

    /// Send `prompt` after the chat's history and stream the reply.
    async fn send_message_stream(
        &self,
        chat: &ChatSession,
        prompt: &str,
    ) -> Result<ProviderStream, ProviderError>;

    /// One non-streamed reply, asked for as JSON.
    async fn generate_json(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;

    /// Advance to the next configured model. False when none is left.
    fn use_next_model(&mut self) -> bool;

    fn supports_embeddings(&self) -> bool;

    async fn batch_embed_contents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Which back end a session was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Hosted,
    Local,
}

/// Hosted back end settings.
#[derive(Debug, Clone)]
pub struct HostedConfig {
    pub api_key: String,
    /// Model ids in priority order.
    pub models: Vec<String>,
    pub safety: SafetyThreshold,
    pub embedding_model: String,
    pub base_url: Option<String>,
}

impl HostedConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            models: hosted::DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            safety: SafetyThreshold::default(),
            embedding_model: hosted::DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: None,
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_safety(mut self, safety: SafetyThreshold) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Local server settings.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub base_url: String,
    pub model: String,
    /// Most recent messages sent along with the pinned system instruction.
    pub history_window: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_url: local::DEFAULT_BASE_URL.to_string(),
            model: local::DEFAULT_MODEL.to_string(),
            history_window: local::DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl LocalConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }
}

#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Hosted(HostedConfig),
    Local(LocalConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Hosted(_) => ProviderKind::Hosted,
            ProviderConfig::Local(_) => ProviderKind::Local,
        }
    }
}

/// The production provider: hosted or local, fixed for the session.
pub enum GameProvider {
    Hosted(HostedProvider),
    Local(LocalProvider),
}

impl GameProvider {
    pub fn from_config(config: &ProviderConfig) -> Self {
        match config {
            ProviderConfig::Hosted(hosted) => GameProvider::Hosted(HostedProvider::new(hosted)),
            ProviderConfig::Local(local) => GameProvider::Local(LocalProvider::new(local)),
        }
    }
}

#[async_trait]
impl Provider for GameProvider {
    fn name(&self) -> String {
        match self {
            GameProvider::Hosted(p) => p.name(),
            GameProvider::Local(p) => p.name(),
        }
    }

    fn kind(&self) -> ProviderKind {
        match self {
            GameProvider::Hosted(_) => ProviderKind::Hosted,
            GameProvider::Local(_) => ProviderKind::Local,
        }
    }

    async fn send_message_stream(
        &self,
        chat: &ChatSession,
        prompt: &str,
    ) -> Result<ProviderStream, ProviderError> {
        match self {
            GameProvider::Hosted(p) => p.send_message_stream(chat, prompt).await,
            GameProvider::Local(p) => p.send_message_stream(chat, prompt).await,
        }
    }

    async fn generate_json(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        match self {
            GameProvider::Hosted(p) => p.generate_json(system, prompt).await,
            GameProvider::Local(p) => p.generate_json(system, prompt).await,
        }
    }

    fn use_next_model(&mut self) -> bool {
        match self {
            GameProvider::Hosted(p) => p.use_next_model(),
            GameProvider::Local(p) => p.use_next_model(),
        }
    }

    fn supports_embeddings(&self) -> bool {
        match self {
            GameProvider::Hosted(p) => p.supports_embeddings(),
            GameProvider::Local(p) => p.supports_embeddings(),
        }
    }

    async fn batch_embed_contents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        match self {
            GameProvider::Hosted(p) => p.batch_embed_contents(texts).await,
            GameProvider::Local(p) => p.batch_embed_contents(texts).await,
        }
    }
}
