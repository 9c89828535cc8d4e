//! Prompt assembly.
//!
//! Fixed instruction text lives in `src/prompts/*.txt`; this module adds the
//! character-specific parts.

use crate::character::{CharacterInfo, PlayerState};
use crate::resolver::RollOutcome;

/// System instruction for one-shot JSON generation.
pub const GENERATOR_SYSTEM: &str =
    "You prepare material for a text adventure. You always answer with valid JSON only.";

/// The narrator's system instruction for a chat session.
pub fn system_instruction(info: &CharacterInfo, player: &PlayerState, mature: bool) -> String {
    let mut prompt = String::new();
    prompt.push_str(include_str!("prompts/system.txt"));

    if mature {
        prompt.push_str("\n\n");
        prompt.push_str(include_str!("prompts/mature.txt"));
    }

    prompt.push_str("\n\n## Player Character\n");
    prompt.push_str(&character_summary(info));

    prompt.push_str("\n## Character Sheet\n");
    prompt.push_str(&sheet_json(player));
    prompt.push('\n');

    if let Some(pregnancy) = &player.pregnancy {
        if pregnancy.revealed {
            prompt.push_str(&format!(
                "\n{} is pregnant (by {}).\n",
                info.name, pregnancy.partner
            ));
        }
    }

    prompt
}

fn character_summary(info: &CharacterInfo) -> String {
    let mut summary = format!("**Name:** {}\n", info.name);
    let fields = [
        ("Gender", &info.gender),
        ("Race", &info.race),
        ("Class", &info.class),
        ("Background", &info.background),
        ("Alignment", &info.alignment),
        ("Description", &info.description),
    ];
    for (label, value) in fields {
        if !value.trim().is_empty() {
            summary.push_str(&format!("**{label}:** {}\n", value.trim()));
        }
    }
    summary
}

/// The sheet as the model sees it. Pregnancy stays hidden until revealed.
fn sheet_json(player: &PlayerState) -> String {
    let mut visible = player.clone();
    if visible.pregnancy.as_ref().is_some_and(|p| !p.revealed) {
        visible.pregnancy = None;
    }
    serde_json::to_string_pretty(&visible).unwrap_or_default()
}

pub fn character_sheet_prompt(info: &CharacterInfo, description: &str) -> String {
    let mut prompt = String::from(include_str!("prompts/character_sheet.txt"));
    prompt.push_str("\n\n## Character\n");
    prompt.push_str(&character_summary(info));
    if !description.trim().is_empty() && description.trim() != info.description.trim() {
        prompt.push_str(&format!("**Player's notes:** {}\n", description.trim()));
    }
    prompt
}

pub fn story_hooks_prompt(info: &CharacterInfo, player: &PlayerState) -> String {
    let mut prompt = String::from(include_str!("prompts/story_hooks.txt"));
    prompt.push_str("\n\n## Character\n");
    prompt.push_str(&character_summary(info));
    prompt.push_str("\n## Character Sheet\n");
    prompt.push_str(&sheet_json(player));
    prompt
}

/// First message of a new adventure.
pub fn adventure_start(info: &CharacterInfo, hook: &str) -> String {
    format!(
        "Begin the adventure for {}. Opening situation: {}\n\
         Set the scene and end where I can act.",
        info.name,
        hook.trim()
    )
}

/// The message sent back to the model after a roll.
pub fn roll_result(outcome: &RollOutcome) -> String {
    format!("Roll result: {outcome}")
}

/// Prepend retrieved lore to an outgoing player message.
pub fn with_lore(chunks: &[String], message: &str) -> String {
    if chunks.is_empty() {
        return message.to_string();
    }
    let mut prompt = String::from("Background lore that may be relevant:\n");
    for chunk in chunks {
        prompt.push_str("- ");
        prompt.push_str(chunk.trim());
        prompt.push('\n');
    }
    prompt.push_str("\nPlayer: ");
    prompt.push_str(message);
    prompt
}
