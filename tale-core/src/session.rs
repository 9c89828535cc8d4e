//! The unit of play and its configuration.
//!
//! A [`Session`] is the explicit context the turn machine operates on: who
//! the character is, their sheet, and the transcript so far. It is created
//! for a new game (from a generated character sheet) or restored from a save.

use crate::character::{CharacterInfo, PlayerState};
use crate::persist::SavedGame;
use crate::provider::{
    create_character_sheet, HostedConfig, LocalConfig, Provider, ProviderConfig, ProviderError,
    ProviderKind, RetryPolicy,
};
use crate::rules::RuleBook;
use chat_client::SafetyThreshold;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Transcript
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: EntryRole,
    pub text: String,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: EntryRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: EntryRole::Model,
            text: text.into(),
        }
    }
}

/// Ordered conversation history.
///
/// Entries are only appended during a turn. Truncation is reserved for
/// reroll and regenerate, which run between turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<TranscriptEntry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    /// Append a completed prompt and its reply.
    pub fn record_exchange(&mut self, prompt: &str, reply: &str) {
        self.entries.push(TranscriptEntry::user(prompt));
        self.entries.push(TranscriptEntry::model(reply));
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub fn pop(&mut self) -> Option<TranscriptEntry> {
        self.entries.pop()
    }
}

// ============================================================================
// Session
// ============================================================================

/// One game in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub character: CharacterInfo,
    pub player: PlayerState,
    pub transcript: Transcript,
    pub story_hooks: Vec<String>,
    pub provider: ProviderKind,
}

impl Session {
    pub fn new(
        character: CharacterInfo,
        player: PlayerState,
        story_hooks: Vec<String>,
        provider: ProviderKind,
    ) -> Self {
        Self {
            character,
            player,
            transcript: Transcript::new(),
            story_hooks,
            provider,
        }
    }

    /// Start a new game: generate the character sheet and story hooks.
    pub async fn create<P: Provider + ?Sized>(
        provider: &mut P,
        character: CharacterInfo,
        config: &SessionConfig,
        rules: &RuleBook,
    ) -> Result<Self, ProviderError> {
        let description = character.description.clone();
        let sheet = create_character_sheet(
            provider,
            &character,
            &description,
            &config.retry,
            config.generation_timeout,
        )
        .await?;

        let mut player = sheet.player_state;
        player.armor_class = rules.armor_class(&player);

        Ok(Self::new(
            character,
            player,
            sheet.story_hooks,
            provider.kind(),
        ))
    }

    pub fn turn_count(&self) -> u64 {
        self.player.turn_count
    }

    pub fn to_saved(&self) -> SavedGame {
        SavedGame::new(
            self.character.clone(),
            self.player.clone(),
            self.transcript.entries().to_vec(),
            self.story_hooks.clone(),
            self.provider,
        )
    }

    pub fn from_saved(saved: SavedGame) -> Self {
        Self {
            character: saved.character,
            player: saved.player,
            transcript: Transcript::from_entries(saved.transcript),
            story_hooks: saved.story_hooks,
            provider: saved.provider,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Errors reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API key configured - set TALE_API_KEY or use TALE_PROVIDER=local")]
    MissingApiKey,

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings for a game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub provider: ProviderConfig,

    /// Enables the mature sub-flow and its prompt addendum.
    pub mature_content: bool,

    /// Probability that a mature event leads to conception.
    pub conception_chance: f64,

    /// Budget for one streamed narrative reply.
    pub turn_timeout: Duration,

    /// Budget for character-sheet and story-hook generation.
    pub generation_timeout: Duration,

    pub retry: RetryPolicy,

    pub save_dir: PathBuf,
}

impl SessionConfig {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            mature_content: false,
            conception_chance: 0.25,
            turn_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(90),
            retry: RetryPolicy::default(),
            save_dir: PathBuf::from("saves"),
        }
    }

    pub fn hosted(api_key: impl Into<String>) -> Self {
        Self::new(ProviderConfig::Hosted(HostedConfig::new(api_key)))
    }

    pub fn local() -> Self {
        Self::new(ProviderConfig::Local(LocalConfig::default()))
    }

    pub fn with_mature_content(mut self, enabled: bool) -> Self {
        self.mature_content = enabled;
        self
    }

    pub fn with_conception_chance(mut self, chance: f64) -> Self {
        self.conception_chance = chance.clamp(0.0, 1.0);
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = dir.into();
        self
    }

    /// Read `TALE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = match get("TALE_PROVIDER").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("hosted") => {
                let api_key = get("TALE_API_KEY").ok_or(ConfigError::MissingApiKey)?;
                let mut hosted = HostedConfig::new(api_key);
                if let Some(models) = get("TALE_MODELS") {
                    let models: Vec<String> = models
                        .split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect();
                    if models.is_empty() {
                        return Err(ConfigError::InvalidValue {
                            key: "TALE_MODELS",
                            value: String::new(),
                        });
                    }
                    hosted = hosted.with_models(models);
                }
                if let Some(safety) = get("TALE_SAFETY") {
                    let threshold =
                        SafetyThreshold::parse(&safety).ok_or(ConfigError::InvalidValue {
                            key: "TALE_SAFETY",
                            value: safety.clone(),
                        })?;
                    hosted = hosted.with_safety(threshold);
                }
                ProviderConfig::Hosted(hosted)
            }
            Some("local") => {
                let mut local = LocalConfig::default();
                if let Some(url) = get("TALE_LOCAL_URL") {
                    local = local.with_base_url(url);
                }
                if let Some(model) = get("TALE_LOCAL_MODEL") {
                    local = local.with_model(model);
                }
                if let Some(window) = get("TALE_HISTORY_WINDOW") {
                    let parsed = window
                        .parse::<usize>()
                        .ok()
                        .filter(|w| *w > 0)
                        .ok_or(ConfigError::InvalidValue {
                            key: "TALE_HISTORY_WINDOW",
                            value: window.clone(),
                        })?;
                    local = local.with_history_window(parsed);
                }
                ProviderConfig::Local(local)
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "TALE_PROVIDER",
                    value: other.to_string(),
                })
            }
        };

        let mut config = Self::new(provider);
        if let Some(mature) = get("TALE_MATURE") {
            config.mature_content = matches!(mature.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(dir) = get("TALE_SAVE_DIR") {
            config.save_dir = PathBuf::from(dir);
        }
        Ok(config)
    }
}
