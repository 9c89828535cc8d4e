//! Character-sheet and story-hook generation.

use super::{with_backoff, Provider, ProviderError, RetryPolicy};
use crate::character::{CharacterInfo, PlayerState};
use crate::json_recovery::{recover_json, MalformedResponse};
use crate::prompts;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;

/// Sheet keys lifted into `playerState` when the model answers with a flat object.
const SHEET_KEYS: [&str; 13] = [
    "health",
    "location",
    "currency",
    "inventory",
    "equippedWeapon",
    "equippedArmor",
    "abilityScores",
    "proficiencyBonus",
    "armorClass",
    "skillProficiencies",
    "savingThrowProficiencies",
    "experience",
    "level",
];

/// A freshly generated character.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterSheet {
    pub player_state: PlayerState,
    pub story_hooks: Vec<String>,
}

/// Ask the model for a starting sheet and story hooks.
pub async fn create_character_sheet<P: Provider + ?Sized>(
    provider: &mut P,
    info: &CharacterInfo,
    description: &str,
    policy: &RetryPolicy,
    budget: Duration,
) -> Result<CharacterSheet, ProviderError> {
    let prompt = prompts::character_sheet_prompt(info, description);
    let raw = generate_with_fallback(provider, &prompt, policy, budget).await?;
    let sheet = parse_character_sheet(&raw)?;
    tracing::info!(
        character = %info.name,
        hooks = sheet.story_hooks.len(),
        "character sheet generated"
    );
    Ok(sheet)
}

/// Ask the model for new story hooks for an existing character.
pub async fn create_story_hooks<P: Provider + ?Sized>(
    provider: &mut P,
    info: &CharacterInfo,
    player: &PlayerState,
    policy: &RetryPolicy,
    budget: Duration,
) -> Result<Vec<String>, ProviderError> {
    let prompt = prompts::story_hooks_prompt(info, player);
    let raw = generate_with_fallback(provider, &prompt, policy, budget).await?;
    Ok(parse_story_hooks(&raw)?)
}

/// One JSON generation with backoff, falling back through the model list on
/// quota errors. The whole operation shares one deadline.
async fn generate_with_fallback<P: Provider + ?Sized>(
    provider: &mut P,
    prompt: &str,
    policy: &RetryPolicy,
    budget: Duration,
) -> Result<String, ProviderError> {
    let deadline = Instant::now() + budget;
    loop {
        let outcome = {
            let shared: &P = provider;
            tokio::time::timeout_at(
                deadline,
                with_backoff(policy, || {
                    shared.generate_json(prompts::GENERATOR_SYSTEM, prompt)
                }),
            )
            .await
        };

        match outcome {
            Err(_) => return Err(ProviderError::StreamTimeout(budget)),
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(err)) if err.is_quota() => {
                tracing::warn!(error = %err, "quota exhausted during generation");
                if !provider.use_next_model() {
                    return Err(ProviderError::ProvidersExhausted);
                }
            }
            Ok(Err(err)) => return Err(err),
        }
    }
}

/// Parse a character-sheet reply.
///
/// Accepts the nested `{playerState, storyHooks}` shape or a flat object
/// whose sheet keys are lifted into `playerState`. Fails only if the level
/// or ability scores are still missing.
pub fn parse_character_sheet(raw: &str) -> Result<CharacterSheet, MalformedResponse> {
    let Value::Object(mut root) = recover_json(raw)? else {
        return Err(MalformedResponse::new("expected a JSON object", raw));
    };

    let mut state = match root.remove("playerState") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for key in SHEET_KEYS {
        if !state.contains_key(key) {
            if let Some(value) = root.remove(key) {
                state.insert(key.to_string(), value);
            }
        }
    }

    if !state.contains_key("level") || !state.contains_key("abilityScores") {
        return Err(MalformedResponse::new(
            "character sheet is missing level or ability scores",
            raw,
        ));
    }

    let mut player_state: PlayerState = serde_json::from_value(Value::Object(state))
        .map_err(|e| MalformedResponse::new(format!("invalid player state: {e}"), raw))?;
    player_state.turn_count = 0;
    player_state.clamp_health();

    let story_hooks = root.get("storyHooks").map(hook_list).unwrap_or_default();

    Ok(CharacterSheet {
        player_state,
        story_hooks,
    })
}

/// Parse a story-hook reply: a bare array or an object holding `storyHooks`.
pub fn parse_story_hooks(raw: &str) -> Result<Vec<String>, MalformedResponse> {
    let value = recover_json(raw)?;
    let list = match &value {
        Value::Array(_) => &value,
        Value::Object(map) => map
            .get("storyHooks")
            .or_else(|| map.get("hooks"))
            .ok_or_else(|| MalformedResponse::new("no story hooks in reply", raw))?,
        _ => return Err(MalformedResponse::new("expected story hooks", raw)),
    };
    Ok(hook_list(list))
}

fn hook_list(value: &Value) -> Vec<String> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Object(map) => ["description", "hook", "title", "text"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(|text| text.trim().to_string()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Failure, Reply, ScriptedProvider};

    const NESTED: &str = r#"{
        "playerState": {
            "health": {"current": 9, "max": 9},
            "location": "Riverside",
            "abilityScores": {"strength": 8, "dexterity": 16},
            "level": 1
        },
        "storyHooks": ["A stolen ring.", {"title": "The ferryman's debt"}]
    }"#;

    #[test]
    fn test_nested_sheet() {
        let sheet = parse_character_sheet(NESTED).unwrap();
        assert_eq!(sheet.player_state.location, "Riverside");
        assert_eq!(sheet.player_state.ability_scores.dexterity, 16);
        assert_eq!(
            sheet.story_hooks,
            vec!["A stolen ring.".to_string(), "The ferryman's debt".to_string()]
        );
    }

    #[test]
    fn test_flat_sheet_is_lifted() {
        let raw = r#"```json
        {"health": {"current": 11, "max": 11}, "level": 2,
         "abilityScores": {"strength": 14}, "equippedWeapon": "Mace",
         "storyHooks": ["Bells at midnight."],}
        ```"#;
        let sheet = parse_character_sheet(raw).unwrap();
        assert_eq!(sheet.player_state.level, 2);
        assert_eq!(sheet.player_state.equipped_weapon.as_deref(), Some("Mace"));
        assert_eq!(sheet.player_state.ability_scores.strength, 14);
        assert_eq!(sheet.story_hooks.len(), 1);
    }

    #[test]
    fn test_missing_level_fails() {
        let err = parse_character_sheet(r#"{"abilityScores": {"strength": 10}}"#).unwrap_err();
        assert!(err.reason.contains("level"));
        assert!(parse_character_sheet(r#"{"playerState": {"level": 1}}"#).is_err());
    }

    #[test]
    fn test_story_hook_shapes() {
        assert_eq!(parse_story_hooks(r#"["a", "b"]"#).unwrap().len(), 2);
        assert_eq!(
            parse_story_hooks(r#"{"storyHooks": [{"description": " c "}]}"#).unwrap(),
            vec!["c".to_string()]
        );
        assert!(parse_story_hooks(r#"{"other": 1}"#).is_err());
    }

    #[tokio::test]
    async fn test_quota_falls_back_to_next_model() {
        let mut provider = ScriptedProvider::new()
            .with_models(&["primary", "backup"])
            .json(Reply::Fail(Failure::Quota))
            .json(Reply::text(NESTED));
        let log = provider.handle();

        let info = CharacterInfo::new("Mira", "Human", "Rogue");
        let sheet = create_character_sheet(
            &mut provider,
            &info,
            "",
            &RetryPolicy::none(),
            Duration::from_secs(90),
        )
        .await
        .unwrap();

        assert_eq!(sheet.player_state.location, "Riverside");
        let models: Vec<String> = log.json_requests().into_iter().map(|r| r.model).collect();
        assert_eq!(models, vec!["primary".to_string(), "backup".to_string()]);
    }

    #[tokio::test]
    async fn test_quota_without_fallback_is_exhausted() {
        let mut provider = ScriptedProvider::new().json(Reply::Fail(Failure::Quota));
        let info = CharacterInfo::new("Mira", "Human", "Rogue");
        let err = create_story_hooks(
            &mut provider,
            &info,
            &PlayerState::default(),
            &RetryPolicy::none(),
            Duration::from_secs(90),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::ProvidersExhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_budget() {
        let mut provider = ScriptedProvider::new().json(Reply::Hang);
        let info = CharacterInfo::new("Mira", "Human", "Rogue");
        let err = create_character_sheet(
            &mut provider,
            &info,
            "",
            &RetryPolicy::default(),
            Duration::from_secs(90),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::StreamTimeout(d) if d == Duration::from_secs(90)));
    }
}
