//! Narrative game engine driven by streamed language-model output.
//!
//! This crate provides:
//! - Recovery of JSON from loosely formatted model text
//! - Extraction of action tags embedded in narration, and display sanitizing
//! - Dice, skill-check and attack resolution
//! - Hosted and local model providers with backoff and model fallback
//! - A streaming response processor feeding display and speech
//! - The turn state machine that ties them together
//!
//! # Quick Start
//!
//! ```ignore
//! use tale_core::{CharacterInfo, GameProvider, RuleBook, Session, SessionConfig, TurnMachine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::from_env()?;
//!     let mut provider = GameProvider::from_config(&config.provider);
//!
//!     let character = CharacterInfo::new("Mira Vale", "Half-Elf", "Rogue");
//!     let session = Session::create(&mut provider, character, &config, &RuleBook::standard()).await?;
//!     let hook = session.story_hooks.first().cloned().unwrap_or_default();
//!
//!     let mut machine = TurnMachine::new(provider, session, config);
//!     machine.start_adventure(&hook).await?;
//!     machine.submit_message("I look around the harbor").await?;
//!     Ok(())
//! }
//! ```

pub mod character;
pub mod collab;
pub mod dice;
pub mod json_recovery;
pub mod persist;
pub mod prompts;
pub mod provider;
pub mod resolver;
pub mod rules;
pub mod session;
pub mod stream;
pub mod tags;
pub mod testing;
pub mod turn;

// Primary public API
pub use character::{CharacterInfo, PlayerState};
pub use collab::{LoreIndex, Narrator, NullUi, RenderTarget, ResponseStatus, SilentNarrator, UiSink};
pub use json_recovery::{recover_json, MalformedResponse};
pub use persist::{JsonFileStore, PersistError, SaveStore, SavedGame};
pub use provider::{GameProvider, Provider, ProviderConfig, ProviderError, RetryPolicy};
pub use resolver::RollOutcome;
pub use rules::RuleBook;
pub use session::{ConfigError, Session, SessionConfig, Transcript, TranscriptEntry};
pub use tags::{extract_tags, sanitize_for_display, ActionChoice};
pub use testing::{ScriptedProvider, TestHarness};
pub use turn::{TurnError, TurnMachine, TurnState};
