//! Collaborators the engine talks to but does not own: rendering, speech,
//! and background-lore retrieval.

use crate::resolver::RollOutcome;
use crate::tags::ActionChoice;
use crate::turn::TurnState;
use async_trait::async_trait;

/// Handle naming the on-screen surface a response streams into.
///
/// Retries and model fallback keep writing to the same target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTarget(pub u64);

/// How a streamed response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Complete,
    Errored,
}

/// Receives render notifications. Every method defaults to a no-op.
pub trait UiSink: Send + Sync {
    fn state_changed(&self, _state: &TurnState) {}

    fn begin_response(&self, _target: RenderTarget) {}

    /// `display_text` is the full sanitized text so far, not a delta.
    fn update_response(&self, _target: RenderTarget, _display_text: &str) {}

    fn finish_response(&self, _target: RenderTarget, _status: ResponseStatus) {}

    fn show_roll(&self, _outcome: &RollOutcome) {}

    fn show_choices(&self, _choices: &[ActionChoice]) {}

    /// The turn is over and the player may type again.
    fn show_controls(&self) {}

    fn show_error(&self, _message: &str) {}
}

/// A sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUi;

impl UiSink for NullUi {}

/// Queued speech output.
pub trait Narrator: Send + Sync {
    fn queue(&self, sentence: &str);
    fn cancel(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNarrator;

impl Narrator for SilentNarrator {
    fn queue(&self, _sentence: &str) {}
    fn cancel(&self) {}
}

/// Background lore retrieval.
#[async_trait]
pub trait LoreIndex: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn search(&self, query: &str) -> Vec<String>;
}
