//! Minimal chat clients for language-model back ends.
//!
//! This crate provides two focused clients that share one request shape:
//! - [`HostedClient`] for a hosted generative-language REST API (streaming,
//!   non-streaming, batch embeddings, safety thresholds)
//! - [`LocalClient`] for a local OpenAI-compatible chat-completion server
//!
//! Both stream replies as plain text fragments parsed from SSE `data:` frames.

pub mod hosted;
pub mod local;
pub mod sse;

pub use hosted::{HostedClient, SafetyThreshold};
pub use local::LocalClient;

use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

/// Errors that can occur when talking to a model back end.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status of an API error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A lazily produced sequence of reply text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// A chat request understood by both clients.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    /// Ask the back end for a JSON document instead of prose.
    pub json_output: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Turn a non-success response into [`Error::Api`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Api {
        status,
        message: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = ChatRequest::new(vec![ChatMessage::user("Hello")])
            .with_system("You narrate")
            .with_temperature(0.7)
            .with_json_output();

        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.system.as_deref(), Some("You narrate"));
        assert_eq!(request.temperature, Some(0.7));
        assert!(request.json_output);
    }

    #[test]
    fn test_message_creation() {
        assert_eq!(ChatMessage::user("hi").role, Role::User);
        assert_eq!(ChatMessage::model("hello").role, Role::Model);
    }

    #[test]
    fn test_error_status() {
        let err = Error::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(Error::NoApiKey.status(), None);
    }
}
