//! The turn state machine.
//!
//! A turn runs `Generating -> Classifying` and then either loops straight
//! back into `Generating` (exactly one action tag: it is resolved and its
//! result sent as the next prompt), stops in `AwaitingChoice` (several
//! action tags), or concludes in `Idle` (none). Provider failures end the
//! turn in `Error` once model fallback has nothing left to offer.
//!
//! All operations take `&mut self`, and each first checks the generating
//! guard, so at most one generation is ever in flight.

use crate::character::Pregnancy;
use crate::collab::{
    LoreIndex, Narrator, NullUi, RenderTarget, ResponseStatus, SilentNarrator, UiSink,
};
use crate::json_recovery::recover_json;
use crate::persist::{PersistError, SaveStore};
use crate::prompts;
use crate::provider::{with_backoff, ChatSession, Provider, ProviderError};
use crate::resolver::{resolve_choice, RollOutcome};
use crate::rules::RuleBook;
use crate::session::{EntryRole, Session, SessionConfig};
use crate::stream::StreamProcessor;
use crate::tags::{extract_tags, ActionChoice, ExtractedTags};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Where the machine is between and during turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Generating,
    Classifying,
    AwaitingChoice(Vec<ActionChoice>),
    Error(String),
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::Idle => write!(f, "idle"),
            TurnState::Generating => write!(f, "generating"),
            TurnState::Classifying => write!(f, "classifying"),
            TurnState::AwaitingChoice(choices) => {
                write!(f, "awaiting choice ({} options)", choices.len())
            }
            TurnState::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Errors from turn operations.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("A response is already being generated")]
    Busy,

    #[error("No choice number {0}")]
    InvalidChoice(usize),

    #[error("No choices are waiting to be made")]
    NotAwaitingChoice,

    #[error("There is no check to reroll")]
    NothingToReroll,

    #[error("There is no response to regenerate")]
    NothingToRegenerate,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Sheet fields whose change can alter armor class.
const EQUIPMENT_KEYS: [&str; 3] = ["equippedArmor", "inventory", "abilityScores"];

/// A prompt as recorded in the transcript and as actually sent.
#[derive(Debug, Clone)]
struct Prompt {
    record: String,
    outgoing: String,
}

impl Prompt {
    fn plain(text: String) -> Self {
        Self {
            outgoing: text.clone(),
            record: text,
        }
    }
}

#[derive(Debug, Clone)]
struct LastCheck {
    choice: ActionChoice,
    /// Transcript length before the check's result was sent.
    transcript_len: usize,
}

/// Drives one [`Session`] through turns against a [`Provider`].
pub struct TurnMachine<P: Provider> {
    provider: P,
    session: Session,
    config: SessionConfig,
    rules: RuleBook,
    chat: ChatSession,
    ui: Box<dyn UiSink>,
    narrator: Box<dyn Narrator>,
    store: Option<Box<dyn SaveStore>>,
    lore: Option<Box<dyn LoreIndex>>,
    rng: StdRng,
    state: TurnState,
    generating: bool,
    next_target: u64,
    last_check: Option<LastCheck>,
    last_outcome: Option<RollOutcome>,
    /// Prompt of a turn that failed, kept so it can be regenerated.
    failed_prompt: Option<Prompt>,
    /// Whether the store already holds a slot for this character.
    persisted: bool,
}

impl<P: Provider> TurnMachine<P> {
    pub fn new(provider: P, session: Session, config: SessionConfig) -> Self {
        let chat = provider.create_chat_session(
            &session.character,
            &session.player,
            config.mature_content,
            session.transcript.entries(),
        );
        Self {
            provider,
            session,
            config,
            rules: RuleBook::standard(),
            chat,
            ui: Box::new(NullUi),
            narrator: Box::new(SilentNarrator),
            store: None,
            lore: None,
            rng: StdRng::from_entropy(),
            state: TurnState::Idle,
            generating: false,
            next_target: 0,
            last_check: None,
            last_outcome: None,
            failed_prompt: None,
            persisted: false,
        }
    }

    pub fn with_ui(mut self, ui: impl UiSink + 'static) -> Self {
        self.ui = Box::new(ui);
        self
    }

    pub fn with_narrator(mut self, narrator: impl Narrator + 'static) -> Self {
        self.narrator = Box::new(narrator);
        self
    }

    pub fn with_store(mut self, store: impl SaveStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_lore(mut self, lore: impl LoreIndex + 'static) -> Self {
        self.lore = Some(Box::new(lore));
        self
    }

    pub fn with_rules(mut self, rules: RuleBook) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Mark the session as already present in the store (a loaded game).
    pub fn resumed(mut self) -> Self {
        self.persisted = true;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The most recent roll resolved this session.
    pub fn last_outcome(&self) -> Option<&RollOutcome> {
        self.last_outcome.as_ref()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Open the adventure with one of the story hooks.
    pub async fn start_adventure(&mut self, hook: &str) -> Result<(), TurnError> {
        self.check_guard()?;
        self.generating = true;
        self.last_check = None;
        self.session.player.turn_count += 1;
        let prompt = Prompt::plain(prompts::adventure_start(&self.session.character, hook));
        self.drive(prompt).await
    }

    /// Send what the player typed.
    pub async fn submit_message(&mut self, text: &str) -> Result<(), TurnError> {
        self.check_guard()?;
        self.generating = true;
        self.last_check = None;
        self.session.player.turn_count += 1;

        let outgoing = match &self.lore {
            Some(lore) if lore.is_ready() => {
                let chunks = lore.search(text).await;
                prompts::with_lore(&chunks, text)
            }
            _ => text.to_string(),
        };
        self.drive(Prompt {
            record: text.to_string(),
            outgoing,
        })
        .await
    }

    /// Resolve the zero-based `index` of the choices on offer.
    pub async fn select_choice(&mut self, index: usize) -> Result<(), TurnError> {
        self.check_guard()?;
        let choice = match &self.state {
            TurnState::AwaitingChoice(choices) => choices
                .get(index)
                .cloned()
                .ok_or(TurnError::InvalidChoice(index))?,
            _ => return Err(TurnError::NotAwaitingChoice),
        };
        self.generating = true;
        self.session.player.turn_count += 1;
        let prompt = self.resolve(choice);
        self.drive(prompt).await
    }

    /// Roll the last check again, discarding everything narrated after it.
    ///
    /// Sheet changes made by the discarded narration are kept.
    pub async fn reroll_last_check(&mut self) -> Result<(), TurnError> {
        self.check_guard()?;
        let last = self.last_check.clone().ok_or(TurnError::NothingToReroll)?;
        self.generating = true;
        self.session.transcript.truncate(last.transcript_len);
        self.failed_prompt = None;
        self.rebuild_chat();
        self.session.player.turn_count += 1;
        let prompt = self.resolve(last.choice);
        self.drive(prompt).await
    }

    /// Ask for a different reply to the last prompt, or retry a failed turn.
    /// Not a player action: the turn count is unchanged.
    pub async fn regenerate_last_response(&mut self) -> Result<(), TurnError> {
        self.check_guard()?;

        let prompt = if let Some(prompt) = self.failed_prompt.take() {
            prompt
        } else {
            let entries = self.session.transcript.entries();
            let [.., user, model] = entries else {
                return Err(TurnError::NothingToRegenerate);
            };
            if user.role != EntryRole::User || model.role != EntryRole::Model {
                return Err(TurnError::NothingToRegenerate);
            }
            let prompt = Prompt::plain(user.text.clone());
            let len = entries.len();
            self.session.transcript.truncate(len - 2);
            self.rebuild_chat();
            prompt
        };

        self.generating = true;
        self.drive(prompt).await
    }

    /// Clear the guard after a turn's future was dropped before finishing.
    pub fn recover_interrupted(&mut self) {
        if self.generating {
            tracing::warn!("turn interrupted before completion");
            self.generating = false;
            self.narrator.cancel();
            self.set_state(TurnState::Error("The turn was interrupted.".into()));
        }
    }

    // ========================================================================
    // Turn loop
    // ========================================================================

    fn check_guard(&self) -> Result<(), TurnError> {
        if self.generating {
            Err(TurnError::Busy)
        } else {
            Ok(())
        }
    }

    async fn drive(&mut self, first: Prompt) -> Result<(), TurnError> {
        self.generating = true;
        let outcome = self.run(first).await;
        self.generating = false;

        match outcome {
            Ok(choices) if choices.is_empty() => {
                self.set_state(TurnState::Idle);
                self.ui.show_controls();
            }
            Ok(choices) => {
                self.ui.show_choices(&choices);
                self.set_state(TurnState::AwaitingChoice(choices));
            }
            Err(err) => {
                tracing::error!(error = %err, "turn failed");
                self.ui.show_error(&err.to_string());
                self.set_state(TurnState::Error(err.to_string()));
                self.ui.show_controls();
                return Err(err.into());
            }
        }

        self.persist().await;
        Ok(())
    }

    /// Generate and classify until the turn needs the player again.
    /// Returns the choices on offer, empty when the turn simply concluded.
    async fn run(&mut self, first: Prompt) -> Result<Vec<ActionChoice>, ProviderError> {
        let mut prompt = first;
        loop {
            let text = self.generate(&prompt).await?;

            self.set_state(TurnState::Classifying);
            let tags = extract_tags(&text);
            self.apply_state_updates(&tags.state_updates).await;
            if self.config.mature_content {
                self.apply_mature_events(&tags).await;
            }

            let mut choices = tags.choices;
            if choices.len() != 1 {
                tracing::debug!(choices = choices.len(), "turn classified");
                return Ok(choices);
            }

            self.session.player.turn_count += 1;
            prompt = self.resolve(choices.remove(0));
        }
    }

    /// Stream one reply, falling back through the model list on quota errors.
    /// Every attempt renders into the same target.
    async fn generate(&mut self, prompt: &Prompt) -> Result<String, ProviderError> {
        let target = RenderTarget(self.next_target);
        self.next_target += 1;
        self.set_state(TurnState::Generating);
        self.ui.begin_response(target);

        loop {
            let result = {
                let processor = StreamProcessor::new(
                    self.ui.as_ref(),
                    self.narrator.as_ref(),
                    target,
                    self.config.turn_timeout,
                );
                let provider = &self.provider;
                let chat = &self.chat;
                let outgoing = prompt.outgoing.as_str();
                processor
                    .process(
                        with_backoff(&self.config.retry, || {
                            provider.send_message_stream(chat, outgoing)
                        }),
                        &prompt.record,
                        &mut self.session.transcript,
                    )
                    .await
            };

            let err = match result {
                Ok(text) => {
                    self.chat.record_exchange(&prompt.record, &text);
                    self.ui.finish_response(target, ResponseStatus::Complete);
                    self.failed_prompt = None;
                    return Ok(text);
                }
                Err(err) if err.is_quota() => {
                    tracing::warn!(error = %err, "quota exhausted");
                    if self.provider.use_next_model() {
                        tracing::info!(model = %self.provider.name(), "retrying turn on fallback model");
                        self.rebuild_chat();
                        continue;
                    }
                    ProviderError::ProvidersExhausted
                }
                Err(err) => err,
            };

            self.ui.finish_response(target, ResponseStatus::Errored);
            self.failed_prompt = Some(prompt.clone());
            return Err(err);
        }
    }

    fn resolve(&mut self, choice: ActionChoice) -> Prompt {
        let outcome = resolve_choice(&choice, &self.session.player, &self.rules, &mut self.rng);
        tracing::info!(%outcome, "action resolved");
        self.ui.show_roll(&outcome);
        let prompt = Prompt::plain(prompts::roll_result(&outcome));
        self.last_check = Some(LastCheck {
            choice,
            transcript_len: self.session.transcript.len(),
        });
        self.last_outcome = Some(outcome);
        prompt
    }

    // ========================================================================
    // Side effects
    // ========================================================================

    async fn apply_state_updates(&mut self, bodies: &[String]) {
        let mut applied = false;
        for body in bodies {
            let mut patch = match recover_json(body) {
                Ok(patch) => patch,
                Err(err) => {
                    tracing::warn!(reason = %err.reason, "skipping unreadable state update");
                    continue;
                }
            };
            if !self.config.mature_content && strip_mature_keys(&mut patch) {
                tracing::debug!("dropped mature keys from state update");
            }
            if let Err(err) = self.session.player.apply_patch(&patch) {
                tracing::warn!(error = %err, "state update does not fit the character sheet");
                continue;
            }
            if touches_equipment(&patch) {
                self.session.player.armor_class = self.rules.armor_class(&self.session.player);
            }
            applied = true;
        }

        if applied {
            tracing::info!("character sheet updated");
            self.persist().await;
            self.rebuild_chat();
        }
    }

    async fn apply_mature_events(&mut self, tags: &ExtractedTags) {
        let mut changed = false;

        for event in &tags.intimacy {
            if !self.session.character.is_named(&event.female)
                || self.session.player.pregnancy.is_some()
            {
                continue;
            }
            if self.rng.gen::<f64>() < self.config.conception_chance {
                tracing::info!(partner = %event.male, "conception");
                self.session.player.pregnancy = Some(Pregnancy {
                    partner: event.male.clone(),
                    conceived_turn: self.session.player.turn_count,
                    revealed: false,
                });
                changed = true;
            }
        }

        for name in &tags.pregnancy_reveals {
            if !self.session.character.is_named(name) {
                continue;
            }
            if let Some(pregnancy) = self.session.player.pregnancy.as_mut() {
                if !pregnancy.revealed {
                    pregnancy.revealed = true;
                    changed = true;
                }
            }
        }

        if changed {
            self.persist().await;
            self.rebuild_chat();
        }
    }

    fn rebuild_chat(&mut self) {
        self.chat = self.provider.create_chat_session(
            &self.session.character,
            &self.session.player,
            self.config.mature_content,
            self.session.transcript.entries(),
        );
    }

    /// Write the session to the store. Failures are logged, never fatal.
    async fn persist(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        let saved = self.session.to_saved();
        let result = if self.persisted {
            match store.update(&saved).await {
                Err(PersistError::NotFound(_)) => store.save(&saved).await,
                other => other,
            }
        } else {
            store.save(&saved).await
        };
        match result {
            Ok(()) => self.persisted = true,
            Err(err) => tracing::warn!(error = %err, "failed to save game"),
        }
    }

    fn set_state(&mut self, state: TurnState) {
        tracing::debug!(%state, "turn state");
        self.state = state;
        self.ui.state_changed(&self.state);
    }
}

/// Remove sheet keys only mature mode may write. Returns whether any were present.
fn strip_mature_keys(patch: &mut Value) -> bool {
    match patch {
        Value::Object(map) => map.remove("pregnancy").is_some(),
        _ => false,
    }
}

fn touches_equipment(patch: &Value) -> bool {
    EQUIPMENT_KEYS.iter().any(|key| patch.get(key).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equipment_keys() {
        assert!(touches_equipment(&json!({"equippedArmor": "Leather"})));
        assert!(!touches_equipment(&json!({"health": {"current": 3}})));
    }

    #[test]
    fn test_strip_mature_keys() {
        let mut patch = json!({"pregnancy": {"partner": "Tomas", "conceivedTurn": 1}, "location": "Inn"});
        assert!(strip_mature_keys(&mut patch));
        assert_eq!(patch, json!({"location": "Inn"}));
        assert!(!strip_mature_keys(&mut patch));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TurnState::Idle.to_string(), "idle");
        assert_eq!(
            TurnState::AwaitingChoice(Vec::new()).to_string(),
            "awaiting choice (0 options)"
        );
    }
}
