//! Draining one streamed model reply.
//!
//! Every fragment re-renders the sanitized text so far. Speech runs on a
//! separate buffer that only ever sees the stable prefix and hands whole
//! sentences to the narrator, so it trails the display by at least one
//! sentence and never speaks a half-typed tag.

use crate::collab::{Narrator, RenderTarget, UiSink};
use crate::provider::{ProviderError, ProviderStream};
use crate::session::Transcript;
use crate::tags::{sanitize_for_display, stable_prefix};
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Splits growing display text into complete sentences.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    consumed: usize,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sentences completed in `stable` since the last call.
    ///
    /// A sentence ends at `.`, `!` or `?` followed by whitespace.
    pub fn advance(&mut self, stable: &str) -> Vec<String> {
        let Some(pending) = stable.get(self.consumed..) else {
            return Vec::new();
        };

        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = pending.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if matches!(c, '.' | '!' | '?')
                && chars.peek().is_some_and(|(_, next)| next.is_whitespace())
            {
                let end = i + c.len_utf8();
                let sentence = pending[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }
        self.consumed += start;
        sentences
    }

    /// Whatever is left once the reply is complete.
    pub fn finish(&mut self, full: &str) -> Option<String> {
        let rest = full.get(self.consumed..)?.trim();
        self.consumed = full.len();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Drains one reply into a render target and the narrator.
pub struct StreamProcessor<'a> {
    ui: &'a dyn UiSink,
    narrator: &'a dyn Narrator,
    target: RenderTarget,
    budget: Duration,
}

impl<'a> StreamProcessor<'a> {
    pub fn new(
        ui: &'a dyn UiSink,
        narrator: &'a dyn Narrator,
        target: RenderTarget,
        budget: Duration,
    ) -> Self {
        Self {
            ui,
            narrator,
            target,
            budget,
        }
    }

    /// Open the stream with `open`, drain it, and record the exchange.
    ///
    /// The budget covers opening and draining together. On any error the
    /// narrator is cancelled and the transcript is left untouched.
    pub async fn process<F>(
        &self,
        open: F,
        prompt: &str,
        transcript: &mut Transcript,
    ) -> Result<String, ProviderError>
    where
        F: Future<Output = Result<ProviderStream, ProviderError>>,
    {
        let deadline = Instant::now() + self.budget;
        match self.drain(open, deadline).await {
            Ok(text) => {
                transcript.record_exchange(prompt, &text);
                Ok(text)
            }
            Err(err) => {
                self.narrator.cancel();
                Err(err)
            }
        }
    }

    async fn drain<F>(&self, open: F, deadline: Instant) -> Result<String, ProviderError>
    where
        F: Future<Output = Result<ProviderStream, ProviderError>>,
    {
        let mut stream = timeout_at(deadline, open)
            .await
            .map_err(|_| ProviderError::StreamTimeout(self.budget))??;

        let mut text = String::new();
        let mut speech = SentenceBuffer::new();
        let mut fragments = 0usize;

        loop {
            let next = timeout_at(deadline, stream.next())
                .await
                .map_err(|_| ProviderError::StreamTimeout(self.budget))?;
            let Some(fragment) = next else {
                break;
            };
            text.push_str(&fragment?);
            fragments += 1;

            let display = sanitize_for_display(&text);
            self.ui.update_response(self.target, &display);
            for sentence in speech.advance(stable_prefix(&display)) {
                self.narrator.queue(&sentence);
            }
        }

        let display = sanitize_for_display(&text);
        self.ui.update_response(self.target, &display);
        if let Some(rest) = speech.finish(&display) {
            self.narrator.queue(&rest);
        }

        tracing::debug!(fragments, chars = text.len(), "stream complete");
        Ok(text)
    }
}
