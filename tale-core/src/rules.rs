//! Weapon and armor rule data with fuzzy name lookup.
//!
//! Models name gear loosely ("my trusty Longsword +1", "studded leather
//! armor"), so lookups pick the longest table key contained in the
//! lower-cased request after enhancement bonuses are stripped.

use crate::character::{Ability, PlayerState};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

lazy_static! {
    static ref ENHANCEMENT: Regex = Regex::new(r"\+\d+").unwrap();
    static ref SHIELD_WORD: Regex = Regex::new(r"(?i)\bshield\b").unwrap();

    /// Standard weapons.
    pub static ref WEAPONS: Vec<WeaponEntry> = vec![
        // Simple melee
        WeaponEntry::new("Club", "1d4"),
        WeaponEntry::new("Dagger", "1d4").finesse(),
        WeaponEntry::new("Greatclub", "1d8"),
        WeaponEntry::new("Handaxe", "1d6"),
        WeaponEntry::new("Javelin", "1d6"),
        WeaponEntry::new("Light Hammer", "1d4"),
        WeaponEntry::new("Mace", "1d6"),
        WeaponEntry::new("Quarterstaff", "1d6"),
        WeaponEntry::new("Sickle", "1d4"),
        WeaponEntry::new("Spear", "1d6"),
        // Martial melee
        WeaponEntry::new("Battleaxe", "1d8"),
        WeaponEntry::new("Flail", "1d8"),
        WeaponEntry::new("Glaive", "1d10"),
        WeaponEntry::new("Greataxe", "1d12"),
        WeaponEntry::new("Greatsword", "2d6"),
        WeaponEntry::new("Halberd", "1d10"),
        WeaponEntry::new("Lance", "1d12"),
        WeaponEntry::new("Longsword", "1d8"),
        WeaponEntry::new("Maul", "2d6"),
        WeaponEntry::new("Morningstar", "1d8"),
        WeaponEntry::new("Pike", "1d10"),
        WeaponEntry::new("Rapier", "1d8").finesse(),
        WeaponEntry::new("Scimitar", "1d6").finesse(),
        WeaponEntry::new("Shortsword", "1d6").finesse(),
        WeaponEntry::new("Trident", "1d6"),
        WeaponEntry::new("War Pick", "1d8"),
        WeaponEntry::new("Warhammer", "1d8"),
        WeaponEntry::new("Whip", "1d4").finesse(),
        // Ranged
        WeaponEntry::new("Light Crossbow", "1d8"),
        WeaponEntry::new("Shortbow", "1d6"),
        WeaponEntry::new("Hand Crossbow", "1d6"),
        WeaponEntry::new("Heavy Crossbow", "1d10"),
        WeaponEntry::new("Longbow", "1d8"),
        WeaponEntry::new("Sling", "1d4"),
        WeaponEntry::new("Dart", "1d4").finesse(),
    ];

    /// Standard armor. Names are kept short so the longest-key rule
    /// distinguishes "half plate" from "plate".
    pub static ref ARMOR: Vec<ArmorEntry> = vec![
        ArmorEntry::new("Padded", ArmorCategory::Light, 11),
        ArmorEntry::new("Leather", ArmorCategory::Light, 11),
        ArmorEntry::new("Studded Leather", ArmorCategory::Light, 12),
        ArmorEntry::new("Hide", ArmorCategory::Medium, 12),
        ArmorEntry::new("Chain Shirt", ArmorCategory::Medium, 13),
        ArmorEntry::new("Scale Mail", ArmorCategory::Medium, 14),
        ArmorEntry::new("Breastplate", ArmorCategory::Medium, 14),
        ArmorEntry::new("Half Plate", ArmorCategory::Medium, 15),
        ArmorEntry::new("Ring Mail", ArmorCategory::Heavy, 14),
        ArmorEntry::new("Chain Mail", ArmorCategory::Heavy, 16),
        ArmorEntry::new("Splint", ArmorCategory::Heavy, 17),
        ArmorEntry::new("Plate", ArmorCategory::Heavy, 18),
        ArmorEntry::new("Shield", ArmorCategory::Shield, 2),
    ];
}

/// Bonus granted by a carried shield.
pub const SHIELD_BONUS: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponEntry {
    pub name: String,
    /// Damage dice in `NdM` notation.
    pub damage: String,
    #[serde(default)]
    pub finesse: bool,
}

impl WeaponEntry {
    pub fn new(name: &str, damage: &str) -> Self {
        Self {
            name: name.to_string(),
            damage: damage.to_string(),
            finesse: false,
        }
    }

    pub fn finesse(mut self) -> Self {
        self.finesse = true;
        self
    }

    /// Fists, when nothing in the table matches.
    pub fn unarmed() -> Self {
        Self::new("Unarmed Strike", "1")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmorCategory {
    Light,
    Medium,
    Heavy,
    Shield,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmorEntry {
    pub name: String,
    pub category: ArmorCategory,
    /// Base armor class, or the bonus for shields.
    pub base: i32,
}

impl ArmorEntry {
    pub fn new(name: &str, category: ArmorCategory, base: i32) -> Self {
        Self {
            name: name.to_string(),
            category,
            base,
        }
    }
}

/// Weapon and armor tables keyed by lower-cased name.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    weapons: BTreeMap<String, WeaponEntry>,
    armor: BTreeMap<String, ArmorEntry>,
}

#[derive(Deserialize)]
struct RuleBookFile {
    #[serde(default)]
    weapons: Vec<WeaponEntry>,
    #[serde(default)]
    armor: Vec<ArmorEntry>,
}

impl RuleBook {
    pub fn new(weapons: Vec<WeaponEntry>, armor: Vec<ArmorEntry>) -> Self {
        Self {
            weapons: weapons
                .into_iter()
                .map(|w| (w.name.to_lowercase(), w))
                .collect(),
            armor: armor
                .into_iter()
                .map(|a| (a.name.to_lowercase(), a))
                .collect(),
        }
    }

    /// The built-in tables.
    pub fn standard() -> Self {
        Self::new(WEAPONS.clone(), ARMOR.clone())
    }

    /// Load tables from `{"weapons": [...], "armor": [...]}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: RuleBookFile = serde_json::from_str(json)?;
        Ok(Self::new(file.weapons, file.armor))
    }

    pub fn find_weapon(&self, name: &str) -> Option<&WeaponEntry> {
        let wanted = lookup_key(name);
        longest_match(&wanted, self.weapons.iter())
    }

    /// Body armor only; shields are detected separately.
    pub fn find_armor(&self, name: &str) -> Option<&ArmorEntry> {
        let wanted = lookup_key(name);
        longest_match(
            &wanted,
            self.armor
                .iter()
                .filter(|(_, a)| a.category != ArmorCategory::Shield),
        )
    }

    /// Whether the player carries a shield anywhere in their gear.
    pub fn has_shield(&self, player: &PlayerState) -> bool {
        player
            .equipped_armor
            .iter()
            .chain(player.equipped_weapon.iter())
            .chain(player.inventory.iter())
            .any(|text| SHIELD_WORD.is_match(text))
    }

    /// Armor class from equipped armor, dexterity, and any shield.
    pub fn armor_class(&self, player: &PlayerState) -> i32 {
        let dex = player.ability_scores.modifier(Ability::Dexterity);
        let armor = player
            .equipped_armor
            .as_deref()
            .and_then(|name| self.find_armor(name));

        let base = match armor {
            Some(a) => match a.category {
                ArmorCategory::Light => a.base + dex,
                ArmorCategory::Medium => a.base + dex.min(2),
                ArmorCategory::Heavy | ArmorCategory::Shield => a.base,
            },
            None => 10 + dex,
        };

        if self.has_shield(player) {
            base + SHIELD_BONUS
        } else {
            base
        }
    }
}

/// Lower-case and drop `+N` enhancement tokens.
fn lookup_key(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = ENHANCEMENT.replace_all(&lowered, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn longest_match<'a, T: 'a>(
    wanted: &str,
    entries: impl Iterator<Item = (&'a String, &'a T)>,
) -> Option<&'a T> {
    entries
        .filter(|(key, _)| wanted.contains(key.as_str()))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, entry)| entry)
}
