//! Character identity and the mutable character sheet.
//!
//! [`PlayerState`] mirrors the camelCase JSON the model reads and writes.
//! Every field has a default so partial model output still deserializes, and
//! updates are applied as deep merges through [`PlayerState::apply_patch`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Abilities and skills
// ============================================================================

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ability::Strength => "Strength",
            Ability::Dexterity => "Dexterity",
            Ability::Constitution => "Constitution",
            Ability::Intelligence => "Intelligence",
            Ability::Wisdom => "Wisdom",
            Ability::Charisma => "Charisma",
        }
    }

    pub fn all() -> [Ability; 6] {
        [
            Ability::Strength,
            Ability::Dexterity,
            Ability::Constitution,
            Ability::Intelligence,
            Ability::Wisdom,
            Ability::Charisma,
        ]
    }

    /// Match a full name or abbreviation, ignoring case.
    pub fn parse(text: &str) -> Option<Ability> {
        let key = normalize_key(text);
        Ability::all().into_iter().find(|a| {
            normalize_key(a.name()) == key || normalize_key(a.abbreviation()) == key
        })
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ability scores as the model writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    #[serde(default = "ten", alias = "str", alias = "STR")]
    pub strength: i32,
    #[serde(default = "ten", alias = "dex", alias = "DEX")]
    pub dexterity: i32,
    #[serde(default = "ten", alias = "con", alias = "CON")]
    pub constitution: i32,
    #[serde(default = "ten", alias = "int", alias = "INT")]
    pub intelligence: i32,
    #[serde(default = "ten", alias = "wis", alias = "WIS")]
    pub wisdom: i32,
    #[serde(default = "ten", alias = "cha", alias = "CHA")]
    pub charisma: i32,
}

fn ten() -> i32 {
    10
}

impl AbilityScores {
    pub fn new(str: i32, dex: i32, con: i32, int: i32, wis: i32, cha: i32) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    pub fn get(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn modifier(&self, ability: Ability) -> i32 {
        crate::resolver::ability_modifier(self.get(ability))
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(10, 10, 10, 10, 10, 10)
    }
}

/// The eighteen standard skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Skill {
    Athletics,
    Acrobatics,
    SleightOfHand,
    Stealth,
    Arcana,
    History,
    Investigation,
    Nature,
    Religion,
    AnimalHandling,
    Insight,
    Medicine,
    Perception,
    Survival,
    Deception,
    Intimidation,
    Performance,
    Persuasion,
}

impl Skill {
    pub fn all() -> [Skill; 18] {
        [
            Skill::Athletics,
            Skill::Acrobatics,
            Skill::SleightOfHand,
            Skill::Stealth,
            Skill::Arcana,
            Skill::History,
            Skill::Investigation,
            Skill::Nature,
            Skill::Religion,
            Skill::AnimalHandling,
            Skill::Insight,
            Skill::Medicine,
            Skill::Perception,
            Skill::Survival,
            Skill::Deception,
            Skill::Intimidation,
            Skill::Performance,
            Skill::Persuasion,
        ]
    }

    pub fn ability(&self) -> Ability {
        match self {
            Skill::Athletics => Ability::Strength,
            Skill::Acrobatics | Skill::SleightOfHand | Skill::Stealth => Ability::Dexterity,
            Skill::Arcana
            | Skill::History
            | Skill::Investigation
            | Skill::Nature
            | Skill::Religion => Ability::Intelligence,
            Skill::AnimalHandling
            | Skill::Insight
            | Skill::Medicine
            | Skill::Perception
            | Skill::Survival => Ability::Wisdom,
            Skill::Deception | Skill::Intimidation | Skill::Performance | Skill::Persuasion => {
                Ability::Charisma
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Skill::Athletics => "Athletics",
            Skill::Acrobatics => "Acrobatics",
            Skill::SleightOfHand => "Sleight of Hand",
            Skill::Stealth => "Stealth",
            Skill::Arcana => "Arcana",
            Skill::History => "History",
            Skill::Investigation => "Investigation",
            Skill::Nature => "Nature",
            Skill::Religion => "Religion",
            Skill::AnimalHandling => "Animal Handling",
            Skill::Insight => "Insight",
            Skill::Medicine => "Medicine",
            Skill::Perception => "Perception",
            Skill::Survival => "Survival",
            Skill::Deception => "Deception",
            Skill::Intimidation => "Intimidation",
            Skill::Performance => "Performance",
            Skill::Persuasion => "Persuasion",
        }
    }

    pub fn parse(text: &str) -> Option<Skill> {
        let key = normalize_key(text);
        Skill::all()
            .into_iter()
            .find(|s| normalize_key(s.name()) == key)
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a `[ROLL|...]` tag asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    Skill(Skill),
    Ability(Ability),
    SavingThrow(Ability),
    Unknown(String),
}

impl CheckKind {
    /// Interpret a skill, ability, or saving-throw name.
    pub fn parse(text: &str) -> CheckKind {
        if let Some(skill) = Skill::parse(text) {
            return CheckKind::Skill(skill);
        }
        if let Some(ability) = Ability::parse(text) {
            return CheckKind::Ability(ability);
        }

        let lowered = text.to_lowercase();
        for suffix in ["saving throw", "save"] {
            if let Some(stem) = lowered.trim().strip_suffix(suffix) {
                if let Some(ability) = Ability::parse(stem) {
                    return CheckKind::SavingThrow(ability);
                }
            }
        }
        CheckKind::Unknown(text.trim().to_string())
    }

    pub fn ability(&self) -> Option<Ability> {
        match self {
            CheckKind::Skill(skill) => Some(skill.ability()),
            CheckKind::Ability(ability) | CheckKind::SavingThrow(ability) => Some(*ability),
            CheckKind::Unknown(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            CheckKind::Skill(skill) => skill.name().to_string(),
            CheckKind::Ability(ability) => ability.name().to_string(),
            CheckKind::SavingThrow(ability) => format!("{} saving throw", ability.name()),
            CheckKind::Unknown(name) => name.clone(),
        }
    }
}

/// Lower-case and drop everything but letters and digits.
pub(crate) fn normalize_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

// ============================================================================
// Character identity
// ============================================================================

/// Who the player is. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterInfo {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub gender: String,
    pub race: String,
    pub class: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub alignment: String,
    #[serde(default)]
    pub description: String,
}

impl CharacterInfo {
    pub fn new(name: impl Into<String>, race: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            gender: String::new(),
            race: race.into(),
            class: class.into(),
            background: String::new(),
            alignment: String::new(),
            description: String::new(),
        }
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = gender.into();
        self
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = background.into();
        self
    }

    pub fn with_alignment(mut self, alignment: impl Into<String>) -> Self {
        self.alignment = alignment.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether `name` refers to this character (case-insensitive, first name allowed).
    pub fn is_named(&self, name: &str) -> bool {
        let name = name.trim();
        if name.eq_ignore_ascii_case(self.name.trim()) {
            return true;
        }
        self.name
            .split_whitespace()
            .next()
            .is_some_and(|first| first.eq_ignore_ascii_case(name))
    }
}

// ============================================================================
// Character sheet
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub current: i32,
    #[serde(default)]
    pub max: i32,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            current: 10,
            max: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    #[serde(default)]
    pub gold: i64,
    #[serde(default)]
    pub silver: i64,
    #[serde(default)]
    pub copper: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pregnancy {
    pub partner: String,
    pub conceived_turn: u64,
    #[serde(default)]
    pub revealed: bool,
}

/// The mutable character sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerState {
    pub health: Health,
    pub location: String,
    pub currency: Currency,
    #[serde(deserialize_with = "lenient_items")]
    pub inventory: Vec<String>,
    pub equipped_weapon: Option<String>,
    pub equipped_armor: Option<String>,
    pub ability_scores: AbilityScores,
    pub proficiency_bonus: i32,
    pub armor_class: i32,
    #[serde(deserialize_with = "lenient_flags")]
    pub skill_proficiencies: BTreeMap<String, bool>,
    #[serde(deserialize_with = "lenient_flags")]
    pub saving_throw_proficiencies: BTreeMap<String, bool>,
    pub experience: i64,
    pub level: u32,
    pub pregnancy: Option<Pregnancy>,
    pub turn_count: u64,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            health: Health::default(),
            location: String::new(),
            currency: Currency::default(),
            inventory: Vec::new(),
            equipped_weapon: None,
            equipped_armor: None,
            ability_scores: AbilityScores::default(),
            proficiency_bonus: 2,
            armor_class: 10,
            skill_proficiencies: BTreeMap::new(),
            saving_throw_proficiencies: BTreeMap::new(),
            experience: 0,
            level: 1,
            pregnancy: None,
            turn_count: 0,
        }
    }
}

impl PlayerState {
    pub fn is_skill_proficient(&self, skill: Skill) -> bool {
        let key = normalize_key(skill.name());
        self.skill_proficiencies
            .iter()
            .any(|(name, flag)| *flag && normalize_key(name) == key)
    }

    pub fn is_save_proficient(&self, ability: Ability) -> bool {
        self.saving_throw_proficiencies
            .iter()
            .any(|(name, flag)| *flag && Ability::parse(name) == Some(ability))
    }

    /// Clamp current health into `[0, max]`.
    pub fn clamp_health(&mut self) {
        self.health.max = self.health.max.max(0);
        self.health.current = self.health.current.clamp(0, self.health.max);
    }

    /// Deep-merge a JSON patch into the sheet.
    ///
    /// Objects merge key by key; any other value replaces what was there.
    /// Health is clamped afterwards and `turnCount` stays engine-owned. On
    /// error the sheet is left untouched.
    pub fn apply_patch(&mut self, patch: &Value) -> Result<(), serde_json::Error> {
        let mut merged = serde_json::to_value(&*self)?;
        merge_json(&mut merged, patch);

        let mut next: PlayerState = serde_json::from_value(merged)?;
        next.turn_count = self.turn_count;
        next.clamp_health();
        *self = next;
        Ok(())
    }
}

/// Recursively merge `patch` into `target`.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Inventory entries may be strings or objects with a `name`.
fn lenient_items<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(items.into_iter().filter_map(item_text).collect())
}

fn item_text(item: Value) -> Option<String> {
    match item {
        Value::String(text) => Some(text),
        Value::Object(fields) => {
            let name = fields.get("name").and_then(Value::as_str)?;
            match fields.get("quantity").and_then(Value::as_i64) {
                Some(quantity) if quantity > 1 => Some(format!("{name} x{quantity}")),
                _ => Some(name.to_string()),
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Proficiency flags may be a `{name: bool}` map or a list of names.
fn lenient_flags<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, bool>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let flags = match value {
        Value::Object(fields) => fields
            .into_iter()
            .map(|(name, flag)| {
                let flag = match flag {
                    Value::Bool(b) => b,
                    Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
                    Value::String(s) => s.eq_ignore_ascii_case("true"),
                    _ => false,
                };
                (name, flag)
            })
            .collect(),
        Value::Array(names) => names
            .into_iter()
            .filter_map(|name| name.as_str().map(|n| (n.to_string(), true)))
            .collect(),
        _ => BTreeMap::new(),
    };
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_kind_parse() {
        assert_eq!(CheckKind::parse("Stealth"), CheckKind::Skill(Skill::Stealth));
        assert_eq!(
            CheckKind::parse("sleight_of_hand"),
            CheckKind::Skill(Skill::SleightOfHand)
        );
        assert_eq!(CheckKind::parse("STR"), CheckKind::Ability(Ability::Strength));
        assert_eq!(
            CheckKind::parse("Dexterity Saving Throw"),
            CheckKind::SavingThrow(Ability::Dexterity)
        );
        assert_eq!(
            CheckKind::parse("wis save"),
            CheckKind::SavingThrow(Ability::Wisdom)
        );
        assert_eq!(
            CheckKind::parse("Juggling"),
            CheckKind::Unknown("Juggling".into())
        );
    }

    #[test]
    fn test_deserialize_partial_state() {
        let state: PlayerState = serde_json::from_value(json!({
            "health": {"current": 12, "max": 12},
            "inventory": ["Rope", {"name": "Torch", "quantity": 3}],
            "abilityScores": {"str": 16, "dexterity": 12},
            "skillProficiencies": ["Athletics"],
            "level": 2
        }))
        .unwrap();

        assert_eq!(state.health.max, 12);
        assert_eq!(state.inventory, vec!["Rope", "Torch x3"]);
        assert_eq!(state.ability_scores.strength, 16);
        assert_eq!(state.ability_scores.wisdom, 10);
        assert!(state.is_skill_proficient(Skill::Athletics));
        assert!(!state.is_skill_proficient(Skill::Stealth));
        assert_eq!(state.proficiency_bonus, 2);
        assert_eq!(state.level, 2);
    }

    #[test]
    fn test_save_proficiency_lookup() {
        let mut state = PlayerState::default();
        state.saving_throw_proficiencies.insert("DEX".into(), true);
        state.saving_throw_proficiencies.insert("strength".into(), false);
        assert!(state.is_save_proficient(Ability::Dexterity));
        assert!(!state.is_save_proficient(Ability::Strength));
    }

    #[test]
    fn test_patch_deep_merges() {
        let mut state = PlayerState {
            location: "Tavern".into(),
            currency: Currency {
                gold: 5,
                silver: 3,
                copper: 0,
            },
            ..PlayerState::default()
        };
        state
            .apply_patch(&json!({"currency": {"gold": 12}, "location": "Forest"}))
            .unwrap();
        assert_eq!(state.currency.gold, 12);
        assert_eq!(state.currency.silver, 3);
        assert_eq!(state.location, "Forest");
    }

    #[test]
    fn test_patch_clamps_health() {
        let mut state = PlayerState::default();
        state
            .apply_patch(&json!({"health": {"current": 99}}))
            .unwrap();
        assert_eq!(state.health.current, 10);

        state
            .apply_patch(&json!({"health": {"current": -4}}))
            .unwrap();
        assert_eq!(state.health.current, 0);
    }

    #[test]
    fn test_patch_cannot_rewind_turn_count() {
        let mut state = PlayerState {
            turn_count: 7,
            ..PlayerState::default()
        };
        state.apply_patch(&json!({"turnCount": 0})).unwrap();
        assert_eq!(state.turn_count, 7);
    }

    #[test]
    fn test_bad_patch_leaves_state() {
        let mut state = PlayerState::default();
        let before = state.clone();
        assert!(state.apply_patch(&json!({"level": "seven"})).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn test_is_named() {
        let info = CharacterInfo::new("Ayla Stormborn", "Elf", "Ranger");
        assert!(info.is_named("ayla stormborn"));
        assert!(info.is_named("Ayla"));
        assert!(!info.is_named("Bran"));
    }
}
