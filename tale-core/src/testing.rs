//! Testing utilities.
//!
//! This module provides tools for integration testing without a model:
//! - `ScriptedProvider` replays scripted replies and records every request
//! - `RecordingUi` and `RecordingNarrator` capture what would be shown and spoken
//! - `MemoryStore` keeps saves in memory
//! - `TestHarness` wires them into a `TurnMachine`

use crate::character::{CharacterInfo, PlayerState};
use crate::collab::{Narrator, RenderTarget, ResponseStatus, UiSink};
use crate::persist::{PersistError, SaveInfo, SaveStore, SavedGame};
use crate::provider::{ChatSession, Provider, ProviderError, ProviderKind, ProviderStream};
use crate::resolver::RollOutcome;
use crate::session::{Session, SessionConfig, TranscriptEntry};
use crate::tags::ActionChoice;
use crate::turn::{TurnMachine, TurnState};
use async_trait::async_trait;
use chat_client::ChatMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Scripted provider
// ============================================================================

/// A failure a scripted reply can simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// HTTP 429 mentioning quota.
    Quota,
    /// HTTP 429 without a quota signal.
    RateLimited,
    /// Any other server error.
    Server,
}

impl Failure {
    fn to_error(self, model: &str) -> ProviderError {
        let (status, message) = match self {
            Failure::Quota => (429, "Resource has been exhausted (e.g. check quota)."),
            Failure::RateLimited => (429, "Too many requests, slow down."),
            Failure::Server => (500, "Internal error."),
        };
        ProviderError::from_client(
            chat_client::Error::Api {
                status,
                message: message.to_string(),
            },
            model,
        )
    }
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Streamed as these fragments.
    Text(Vec<String>),
    /// Fails when the request is made.
    Fail(Failure),
    /// Streams these fragments, then fails.
    Broken(Vec<String>, Failure),
    /// Never finishes.
    Hang,
}

impl Reply {
    /// A reply streamed word by word.
    pub fn text(text: &str) -> Self {
        Reply::Text(text.split_inclusive(' ').map(String::from).collect())
    }

    pub fn fragments(fragments: &[&str]) -> Self {
        Reply::Text(fragments.iter().map(|f| f.to_string()).collect())
    }
}

/// A request the scripted provider received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub model: String,
    pub prompt: String,
    pub system: String,
    pub history: Vec<ChatMessage>,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    json: VecDeque<Reply>,
    requests: Vec<Request>,
    json_requests: Vec<Request>,
    chat_sessions: usize,
}

/// Shared view of a scripted provider's log, usable after the provider has
/// been moved into a machine.
#[derive(Clone)]
pub struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    /// Streamed chat requests, in order.
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.0).requests.clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.0).requests.iter().map(|r| r.prompt.clone()).collect()
    }

    /// JSON generation requests, in order.
    pub fn json_requests(&self) -> Vec<Request> {
        lock(&self.0).json_requests.clone()
    }

    /// How many chat sessions have been created.
    pub fn chat_sessions(&self) -> usize {
        lock(&self.0).chat_sessions
    }

    pub fn push_reply(&self, reply: Reply) {
        lock(&self.0).replies.push_back(reply);
    }

    pub fn remaining(&self) -> usize {
        lock(&self.0).replies.len()
    }
}

/// A provider that replays scripted replies.
///
/// Use this for deterministic tests without network access. When the script
/// runs out, replies with a plain sentence.
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
    models: Vec<String>,
    current: usize,
    kind: ProviderKind,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            models: vec!["scripted".to_string()],
            current: 0,
            kind: ProviderKind::Hosted,
        }
    }

    /// Model ids walked by `use_next_model`.
    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self.current = 0;
        self
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Queue a streamed chat reply.
    pub fn reply(self, reply: Reply) -> Self {
        lock(&self.script).replies.push_back(reply);
        self
    }

    /// Queue a JSON generation reply.
    pub fn json(self, reply: Reply) -> Self {
        lock(&self.script).json.push_back(reply);
        self
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle(Arc::clone(&self.script))
    }

    pub fn model(&self) -> &str {
        self.models
            .get(self.current)
            .map(String::as_str)
            .unwrap_or("scripted")
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> String {
        format!("scripted:{}", self.model())
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn create_chat_session(
        &self,
        info: &CharacterInfo,
        player: &PlayerState,
        mature: bool,
        history: &[TranscriptEntry],
    ) -> ChatSession {
        lock(&self.script).chat_sessions += 1;
        ChatSession::new(
            crate::prompts::system_instruction(info, player, mature),
            history,
        )
    }

    async fn send_message_stream(
        &self,
        chat: &ChatSession,
        prompt: &str,
    ) -> Result<ProviderStream, ProviderError> {
        let model = self.model().to_string();
        let reply = {
            let mut script = lock(&self.script);
            script.requests.push(Request {
                model: model.clone(),
                prompt: prompt.to_string(),
                system: chat.system_instruction.clone(),
                history: chat.history.clone(),
            });
            script.replies.pop_front()
        };

        let reply = reply.unwrap_or_else(|| Reply::text("Nothing more happens."));
        let stream: ProviderStream = match reply {
            Reply::Text(fragments) => {
                Box::pin(futures::stream::iter(
                    fragments.into_iter().map(Ok::<String, ProviderError>),
                ))
            }
            Reply::Fail(failure) => return Err(failure.to_error(&model)),
            Reply::Broken(fragments, failure) => {
                let items: Vec<Result<String, ProviderError>> = fragments
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(failure.to_error(&model))))
                    .collect();
                Box::pin(futures::stream::iter(items))
            }
            Reply::Hang => Box::pin(futures::stream::pending::<Result<String, ProviderError>>()),
        };
        Ok(stream)
    }

    async fn generate_json(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let model = self.model().to_string();
        let reply = {
            let mut script = lock(&self.script);
            script.json_requests.push(Request {
                model: model.clone(),
                prompt: prompt.to_string(),
                system: system.to_string(),
                history: Vec::new(),
            });
            script.json.pop_front()
        };

        match reply {
            Some(Reply::Text(fragments)) | Some(Reply::Broken(fragments, _)) => {
                Ok(fragments.concat())
            }
            Some(Reply::Fail(failure)) => Err(failure.to_error(&model)),
            Some(Reply::Hang) => futures::future::pending().await,
            None => Ok("{}".to_string()),
        }
    }

    fn use_next_model(&mut self) -> bool {
        if self.current + 1 < self.models.len() {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn supports_embeddings(&self) -> bool {
        false
    }

    async fn batch_embed_contents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::EmbeddingsUnsupported(self.name()))
    }
}

// ============================================================================
// Recording collaborators
// ============================================================================

/// Something the UI was told.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    State(TurnState),
    Begin(RenderTarget),
    Update(RenderTarget, String),
    Finish(RenderTarget, ResponseStatus),
    Roll(RollOutcome),
    Choices(Vec<ActionChoice>),
    Controls,
    Error(String),
}

/// A UI sink that records every notification.
#[derive(Clone, Default)]
pub struct RecordingUi {
    events: Arc<Mutex<Vec<UiEvent>>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        lock(&self.events).clone()
    }

    /// Display texts pushed to any render target, in order.
    pub fn updates(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                UiEvent::Update(_, text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<TurnState> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                UiEvent::State(state) => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn rolls(&self) -> Vec<RollOutcome> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                UiEvent::Roll(outcome) => Some(outcome.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&UiEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| matches(e)).count()
    }

    fn record(&self, event: UiEvent) {
        lock(&self.events).push(event);
    }
}

impl UiSink for RecordingUi {
    fn state_changed(&self, state: &TurnState) {
        self.record(UiEvent::State(state.clone()));
    }

    fn begin_response(&self, target: RenderTarget) {
        self.record(UiEvent::Begin(target));
    }

    fn update_response(&self, target: RenderTarget, display_text: &str) {
        self.record(UiEvent::Update(target, display_text.to_string()));
    }

    fn finish_response(&self, target: RenderTarget, status: ResponseStatus) {
        self.record(UiEvent::Finish(target, status));
    }

    fn show_roll(&self, outcome: &RollOutcome) {
        self.record(UiEvent::Roll(outcome.clone()));
    }

    fn show_choices(&self, choices: &[ActionChoice]) {
        self.record(UiEvent::Choices(choices.to_vec()));
    }

    fn show_controls(&self) {
        self.record(UiEvent::Controls);
    }

    fn show_error(&self, message: &str) {
        self.record(UiEvent::Error(message.to_string()));
    }
}

/// A narrator that records queued sentences and cancellations.
#[derive(Clone, Default)]
pub struct RecordingNarrator {
    spoken: Arc<Mutex<Vec<String>>>,
    cancellations: Arc<Mutex<usize>>,
}

impl RecordingNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }

    pub fn cancellations(&self) -> usize {
        *lock(&self.cancellations)
    }
}

impl Narrator for RecordingNarrator {
    fn queue(&self, sentence: &str) {
        lock(&self.spoken).push(sentence.to_string());
    }

    fn cancel(&self) {
        *lock(&self.cancellations) += 1;
    }
}

/// Saves kept in memory, shared between clones.
#[derive(Clone, Default)]
pub struct MemoryStore {
    saves: Arc<Mutex<HashMap<Uuid, SavedGame>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<SavedGame> {
        lock(&self.saves).get(&id).cloned()
    }

    /// Successful `save` and `update` calls so far.
    pub fn writes(&self) -> usize {
        *lock(&self.writes)
    }
}

#[async_trait]
impl SaveStore for MemoryStore {
    async fn save(&self, game: &SavedGame) -> Result<(), PersistError> {
        lock(&self.saves).insert(game.id(), game.clone());
        *lock(&self.writes) += 1;
        Ok(())
    }

    async fn update(&self, game: &SavedGame) -> Result<(), PersistError> {
        let mut saves = lock(&self.saves);
        if !saves.contains_key(&game.id()) {
            return Err(PersistError::NotFound(game.id()));
        }
        saves.insert(game.id(), game.clone());
        *lock(&self.writes) += 1;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), PersistError> {
        lock(&self.saves)
            .remove(&id)
            .map(|_| ())
            .ok_or(PersistError::NotFound(id))
    }

    async fn load(&self, id: Uuid) -> Result<SavedGame, PersistError> {
        self.get(id).ok_or(PersistError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<SaveInfo>, PersistError> {
        let mut saves: Vec<SaveInfo> = lock(&self.saves).values().map(SaveInfo::from).collect();
        saves.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(saves)
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A sample character for tests.
pub fn sample_session() -> Session {
    let character = CharacterInfo::new("Mira Vale", "Half-Elf", "Rogue")
        .with_gender("female")
        .with_background("Urchin");
    let mut player = PlayerState {
        location: "The Drowned Lantern".into(),
        equipped_weapon: Some("Rapier".into()),
        equipped_armor: Some("Leather Armor".into()),
        ..PlayerState::default()
    };
    player.ability_scores.dexterity = 16;
    player.skill_proficiencies.insert("Stealth".into(), true);
    Session::new(
        character,
        player,
        vec!["A smuggler owes you money.".into()],
        ProviderKind::Hosted,
    )
}

/// A turn machine wired to recording collaborators.
pub struct TestHarness {
    pub machine: TurnMachine<ScriptedProvider>,
    pub script: ScriptHandle,
    pub ui: RecordingUi,
    pub narrator: RecordingNarrator,
    pub store: MemoryStore,
}

impl TestHarness {
    /// Wire `provider` to the sample session with no retries.
    pub fn new(provider: ScriptedProvider) -> Self {
        let config = SessionConfig::local().with_retry(crate::provider::RetryPolicy::none());
        Self::with_config(provider, sample_session(), config)
    }

    pub fn with_config(provider: ScriptedProvider, session: Session, config: SessionConfig) -> Self {
        let script = provider.handle();
        let ui = RecordingUi::new();
        let narrator = RecordingNarrator::new();
        let store = MemoryStore::new();
        let machine = TurnMachine::new(provider, session, config)
            .with_ui(ui.clone())
            .with_narrator(narrator.clone())
            .with_store(store.clone())
            .with_rng_seed(7);
        Self {
            machine,
            script,
            ui,
            narrator,
            store,
        }
    }

    pub fn session(&self) -> &Session {
        self.machine.session()
    }

    pub fn state(&self) -> &TurnState {
        self.machine.state()
    }

    pub fn saved(&self) -> Option<SavedGame> {
        self.store.get(self.session().character.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let provider = ScriptedProvider::new()
            .reply(Reply::text("one two"))
            .reply(Reply::Fail(Failure::RateLimited));
        let log = provider.handle();
        let chat = ChatSession::default();

        let stream = provider.send_message_stream(&chat, "first").await.unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["one ".to_string(), "two".to_string()]);

        let err = provider.send_message_stream(&chat, "second").await.err().unwrap();
        assert!(matches!(err, ProviderError::Transient(_)));
        assert_eq!(log.prompts(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_store_update_needs_slot() {
        let store = MemoryStore::new();
        let saved = sample_session().to_saved();
        assert!(store.update(&saved).await.is_err());
        store.save(&saved).await.unwrap();
        store.update(&saved).await.unwrap();
        assert_eq!(store.writes(), 2);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
