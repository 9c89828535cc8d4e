//! Provider failures during a turn: backoff, model fallback, exhaustion and
//! timeouts.
//!
//! Timing tests run on paused tokio time, so they finish instantly.

use std::time::Duration;
use tale_core::collab::ResponseStatus;
use tale_core::testing::{sample_session, Failure, Reply, ScriptedProvider, TestHarness, UiEvent};
use tale_core::{ProviderError, SessionConfig, TurnError, TurnState};
use tokio::time::Instant;

fn harness_with_default_retry(provider: ScriptedProvider) -> TestHarness {
    TestHarness::with_config(provider, sample_session(), SessionConfig::local())
}

// =============================================================================
// MODEL FALLBACK
// =============================================================================

#[tokio::test]
async fn test_quota_falls_back_and_resubmits_once() {
    let provider = ScriptedProvider::new()
        .with_models(&["primary", "backup"])
        .reply(Reply::Fail(Failure::Quota))
        .reply(Reply::text("The tide turns."));
    let mut h = TestHarness::new(provider);

    h.machine.submit_message("I wait for the tide").await.unwrap();

    let requests = h.script.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].model, "primary");
    assert_eq!(requests[1].model, "backup");
    assert_eq!(requests[0].prompt, requests[1].prompt);
    assert_eq!(h.machine.provider().model(), "backup");

    // Initial chat plus the reinitialized one.
    assert_eq!(h.script.chat_sessions(), 2);
    assert_eq!(h.session().transcript.len(), 2);
    assert_eq!(h.session().turn_count(), 1);
    assert_eq!(h.state(), &TurnState::Idle);

    // Same render target throughout.
    assert_eq!(h.ui.count(|e| matches!(e, UiEvent::Begin(_))), 1);
    assert_eq!(
        h.ui.count(|e| matches!(e, UiEvent::Finish(_, ResponseStatus::Complete))),
        1
    );
}

#[tokio::test]
async fn test_quota_mid_stream_falls_back() {
    let provider = ScriptedProvider::new()
        .with_models(&["primary", "backup"])
        .reply(Reply::Broken(vec!["The wind ".to_string()], Failure::Quota))
        .reply(Reply::text("The wind howls."));
    let mut h = TestHarness::new(provider);

    h.machine.submit_message("I listen").await.unwrap();

    assert_eq!(h.session().transcript.len(), 2);
    assert_eq!(h.session().transcript.last().unwrap().text, "The wind howls.");
    assert_eq!(h.narrator.cancellations(), 1);
    assert_eq!(h.ui.updates().last().unwrap(), "The wind howls.");
}

#[tokio::test]
async fn test_fallback_keeps_history() {
    let provider = ScriptedProvider::new()
        .with_models(&["primary", "backup"])
        .reply(Reply::text("You arrive at the inn."))
        .reply(Reply::Fail(Failure::Quota))
        .reply(Reply::text("The innkeeper nods."));
    let mut h = TestHarness::new(provider);

    h.machine.submit_message("I travel").await.unwrap();
    h.machine.submit_message("I greet the innkeeper").await.unwrap();

    let requests = h.script.requests();
    assert_eq!(requests[2].model, "backup");
    assert_eq!(requests[2].history.len(), 2);
    assert_eq!(requests[2].history[1].text, "You arrive at the inn.");
}

#[tokio::test]
async fn test_exhausted_models_end_turn_in_error() {
    let provider = ScriptedProvider::new()
        .with_models(&["only"])
        .reply(Reply::Fail(Failure::Quota));
    let mut h = TestHarness::new(provider);

    let err = h.machine.submit_message("I act").await.unwrap_err();

    assert!(matches!(
        err,
        TurnError::Provider(ProviderError::ProvidersExhausted)
    ));
    assert!(matches!(h.state(), TurnState::Error(_)));
    assert!(!h.machine.is_generating());
    assert!(h.session().transcript.is_empty());
    assert_eq!(h.ui.count(|e| matches!(e, UiEvent::Error(_))), 1);
    assert_eq!(
        h.ui.count(|e| matches!(e, UiEvent::Finish(_, ResponseStatus::Errored))),
        1
    );
    assert_eq!(h.ui.count(|e| matches!(e, UiEvent::Controls)), 1);
}

// =============================================================================
// BACKOFF
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rate_limit_backs_off_then_succeeds() {
    let provider = ScriptedProvider::new()
        .reply(Reply::Fail(Failure::RateLimited))
        .reply(Reply::Fail(Failure::RateLimited))
        .reply(Reply::text("At last, an answer."));
    let mut h = harness_with_default_retry(provider);
    let start = Instant::now();

    h.machine.submit_message("Hello?").await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(h.script.requests().len(), 3);
    assert_eq!(h.session().transcript.len(), 2);
    assert_eq!(h.script.chat_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_gives_up_after_three_retries() {
    let mut provider = ScriptedProvider::new();
    for _ in 0..4 {
        provider = provider.reply(Reply::Fail(Failure::RateLimited));
    }
    let mut h = harness_with_default_retry(provider);
    let start = Instant::now();

    let err = h.machine.submit_message("Hello?").await.unwrap_err();

    assert!(matches!(err, TurnError::Provider(ProviderError::Transient(_))));
    assert_eq!(start.elapsed(), Duration::from_secs(7));
    assert_eq!(h.script.requests().len(), 4);
    assert!(matches!(h.state(), TurnState::Error(_)));
}

// =============================================================================
// TIMEOUT
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stalled_stream_times_out() {
    let provider = ScriptedProvider::new().reply(Reply::Hang);
    let mut h = TestHarness::new(provider);
    let start = Instant::now();

    let err = h.machine.submit_message("I wait").await.unwrap_err();

    assert!(matches!(
        err,
        TurnError::Provider(ProviderError::StreamTimeout(d)) if d == Duration::from_secs(30)
    ));
    assert_eq!(start.elapsed(), Duration::from_secs(30));
    assert!(matches!(h.state(), TurnState::Error(_)));
    assert!(!h.machine.is_generating());
    assert_eq!(h.narrator.cancellations(), 1);
    assert!(h.session().transcript.is_empty());
    // A timeout is reported, not retried.
    assert_eq!(h.script.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_turn_timeout() {
    let provider = ScriptedProvider::new().reply(Reply::Hang);
    let config = SessionConfig::local().with_turn_timeout(Duration::from_secs(5));
    let mut h = TestHarness::with_config(provider, sample_session(), config);
    let start = Instant::now();

    assert!(h.machine.submit_message("I wait").await.is_err());
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}
