//! Action tags embedded in model narrative.
//!
//! The model requests mechanics by writing bracketed tags into its prose:
//!
//! ```text
//! [ROLL|<skill-or-ability>|<description>|<ADVANTAGE|DISADVANTAGE|NONE>]
//! [ATTACK|<weapon>|<target>|<modifier>]
//! [STATE_UPDATE]<json>[/STATE_UPDATE]
//! [PIV_SEX|<male>|<female>]
//! [PREGNANCY_REVEALED|<name>]
//! ```
//!
//! [`extract_tags`] pulls them out; [`sanitize_for_display`] removes them from
//! what the player sees and hears.

use crate::dice::Advantage;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref ROLL_TAG: Regex = Regex::new(r"\[ROLL\|([^|\]]+)\|([^|\]]+)\|([^|\]]+)\]").unwrap();
    static ref ATTACK_TAG: Regex =
        Regex::new(r"\[ATTACK\|([^|\]]+)\|([^|\]]+)\|([^|\]]+)\]").unwrap();
    static ref STATE_UPDATE_BLOCK: Regex =
        Regex::new(r"(?s)\[STATE_UPDATE\](.*?)\[/STATE_UPDATE\]").unwrap();
    static ref PIV_SEX_TAG: Regex = Regex::new(r"\[PIV_SEX\|([^|\]]+)\|([^|\]]+)\]").unwrap();
    static ref PREGNANCY_TAG: Regex = Regex::new(r"\[PREGNANCY_REVEALED\|([^|\]]+)\]").unwrap();
    static ref OPEN_STATE_UPDATE: Regex = Regex::new(r"(?s)\[STATE_UPDATE\].*$").unwrap();
    static ref CLOSE_STATE_UPDATE: Regex = Regex::new(r"\[/STATE_UPDATE\]").unwrap();
}

/// A mechanic the model asked the player to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionChoice {
    Attack {
        weapon: String,
        target: String,
        modifier: Advantage,
    },
    Roll {
        skill: String,
        description: String,
        modifier: Advantage,
    },
}

impl ActionChoice {
    pub fn modifier(&self) -> Advantage {
        match self {
            ActionChoice::Attack { modifier, .. } | ActionChoice::Roll { modifier, .. } => {
                *modifier
            }
        }
    }

    /// Short button label.
    pub fn label(&self) -> String {
        let suffix = match self.modifier() {
            Advantage::Normal => "",
            Advantage::Advantage => " (advantage)",
            Advantage::Disadvantage => " (disadvantage)",
        };
        match self {
            ActionChoice::Attack { weapon, target, .. } => {
                format!("Attack {target} with {weapon}{suffix}")
            }
            ActionChoice::Roll {
                skill, description, ..
            } => format!("{skill}: {description}{suffix}"),
        }
    }
}

impl fmt::Display for ActionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A `[PIV_SEX|male|female]` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntimacyEvent {
    pub male: String,
    pub female: String,
}

/// Everything mechanical found in one model turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTags {
    /// ROLL and ATTACK tags in source order.
    pub choices: Vec<ActionChoice>,
    /// Raw bodies of each STATE_UPDATE block, in order.
    pub state_updates: Vec<String>,
    pub intimacy: Vec<IntimacyEvent>,
    pub pregnancy_reveals: Vec<String>,
}

impl ExtractedTags {
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
            && self.state_updates.is_empty()
            && self.intimacy.is_empty()
            && self.pregnancy_reveals.is_empty()
    }
}

/// Parse a tag modifier field. Anything unrecognized means no modifier.
pub fn parse_modifier(text: &str) -> Advantage {
    match text.trim().to_uppercase().as_str() {
        "ADVANTAGE" => Advantage::Advantage,
        "DISADVANTAGE" => Advantage::Disadvantage,
        _ => Advantage::Normal,
    }
}

/// Extract every tag from the full text of one model turn.
pub fn extract_tags(text: &str) -> ExtractedTags {
    let mut positioned: Vec<(usize, ActionChoice)> = Vec::new();

    for caps in ROLL_TAG.captures_iter(text) {
        positioned.push((
            caps.get(0).map_or(0, |m| m.start()),
            ActionChoice::Roll {
                skill: caps[1].trim().to_string(),
                description: caps[2].trim().to_string(),
                modifier: parse_modifier(&caps[3]),
            },
        ));
    }
    for caps in ATTACK_TAG.captures_iter(text) {
        positioned.push((
            caps.get(0).map_or(0, |m| m.start()),
            ActionChoice::Attack {
                weapon: caps[1].trim().to_string(),
                target: caps[2].trim().to_string(),
                modifier: parse_modifier(&caps[3]),
            },
        ));
    }
    positioned.sort_by_key(|(pos, _)| *pos);

    ExtractedTags {
        choices: positioned.into_iter().map(|(_, choice)| choice).collect(),
        state_updates: STATE_UPDATE_BLOCK
            .captures_iter(text)
            .map(|caps| caps[1].trim().to_string())
            .collect(),
        intimacy: PIV_SEX_TAG
            .captures_iter(text)
            .map(|caps| IntimacyEvent {
                male: caps[1].trim().to_string(),
                female: caps[2].trim().to_string(),
            })
            .collect(),
        pregnancy_reveals: PREGNANCY_TAG
            .captures_iter(text)
            .map(|caps| caps[1].trim().to_string())
            .collect(),
    }
}

/// Remove every tag from `text`, leaving surrounding prose untouched.
///
/// Safe to call on a growing prefix: an opened but unterminated
/// STATE_UPDATE block is hidden through the end of the text. A half-typed
/// bracket tag stays visible until it closes; see [`stable_prefix`].
///
/// Passes repeat until nothing changes, so removing one tag cannot leave
/// another one assembled from its neighbours.
pub fn sanitize_for_display(text: &str) -> String {
    let mut current = strip_tags(text);
    loop {
        let next = strip_tags(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_tags(text: &str) -> String {
    let text = STATE_UPDATE_BLOCK.replace_all(text, "");
    let text = OPEN_STATE_UPDATE.replace(&text, "");
    let text = CLOSE_STATE_UPDATE.replace_all(&text, "");
    let text = ROLL_TAG.replace_all(&text, "");
    let text = ATTACK_TAG.replace_all(&text, "");
    let text = PIV_SEX_TAG.replace_all(&text, "");
    let text = PREGNANCY_TAG.replace_all(&text, "");
    text.into_owned()
}

/// The part of sanitized text that can no longer change as more arrives:
/// everything before a trailing `[` that has not been closed yet.
pub fn stable_prefix(sanitized: &str) -> &str {
    match sanitized.rfind('[') {
        Some(open) if !sanitized[open..].contains(']') => &sanitized[..open],
        _ => sanitized,
    }
}
