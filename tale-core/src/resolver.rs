//! Check and attack resolution.
//!
//! These are the only mechanics the engine computes itself; everything else
//! is narrated by the model. All functions are pure apart from the injected
//! random source.

use crate::character::{Ability, CheckKind, PlayerState};
use crate::dice::{roll_d20, Advantage, D20Roll, DiceSpec};
use crate::rules::{RuleBook, WeaponEntry};
use crate::tags::ActionChoice;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `floor((score - 10) / 2)`.
pub fn ability_modifier(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}

/// A resolved skill check, ability check, or saving throw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub label: String,
    pub description: String,
    pub advantage: Advantage,
    pub d20: D20Roll,
    pub modifier: i32,
    pub total: i32,
    pub critical: bool,
}

/// A resolved weapon attack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub weapon: String,
    pub target: String,
    pub advantage: Advantage,
    pub d20: D20Roll,
    /// Ability the attack and damage were rolled with.
    pub ability: Ability,
    pub attack_bonus: i32,
    pub attack_total: i32,
    pub critical: bool,
    pub damage_rolls: Vec<u32>,
    pub damage_modifier: i32,
    /// Never below 1.
    pub damage: i32,
}

/// Outcome of resolving one [`ActionChoice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollOutcome {
    Check(CheckOutcome),
    Attack(AttackOutcome),
}

impl RollOutcome {
    pub fn total(&self) -> i32 {
        match self {
            RollOutcome::Check(c) => c.total,
            RollOutcome::Attack(a) => a.attack_total,
        }
    }

    pub fn is_critical(&self) -> bool {
        match self {
            RollOutcome::Check(c) => c.critical,
            RollOutcome::Attack(a) => a.critical,
        }
    }
}

fn signed(value: i32) -> String {
    if value < 0 {
        format!("- {}", value.abs())
    } else {
        format!("+ {value}")
    }
}

fn dice_text(d20: &D20Roll, advantage: Advantage) -> String {
    match advantage {
        Advantage::Normal => format!("{}", d20.chosen),
        Advantage::Advantage | Advantage::Disadvantage => {
            let rolls: Vec<String> = d20.rolls.iter().map(|r| r.to_string()).collect();
            format!(
                "{} ({} of {})",
                d20.chosen,
                advantage.to_string().to_lowercase(),
                rolls.join(", ")
            )
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} check ({}): rolled {} {} = {}",
            self.label,
            self.description,
            dice_text(&self.d20, self.advantage),
            signed(self.modifier),
            self.total
        )?;
        if self.critical {
            write!(f, ". Natural 20!")?;
        } else if self.d20.is_natural_1() {
            write!(f, ". Natural 1.")?;
        }
        Ok(())
    }
}

impl fmt::Display for AttackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Attack on {} with {}: rolled {} {} = {} to hit",
            self.target,
            self.weapon,
            dice_text(&self.d20, self.advantage),
            signed(self.attack_bonus),
            self.attack_total
        )?;
        if self.critical {
            write!(f, " (critical hit!)")?;
        }
        write!(f, ", {} damage", self.damage)
    }
}

impl fmt::Display for RollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollOutcome::Check(c) => c.fmt(f),
            RollOutcome::Attack(a) => a.fmt(f),
        }
    }
}

/// Roll a skill check, ability check, or saving throw named by `check`.
///
/// Proficiency applies when the skill or the governing ability's saving throw
/// is flagged proficient. Unknown names roll a bare d20.
pub fn roll_check<R: Rng>(
    check: &str,
    description: &str,
    player: &PlayerState,
    advantage: Advantage,
    rng: &mut R,
) -> CheckOutcome {
    let kind = CheckKind::parse(check);
    let modifier = check_modifier(&kind, player);
    let d20 = roll_d20(advantage, rng);

    CheckOutcome {
        label: kind.label(),
        description: description.to_string(),
        advantage,
        total: d20.chosen as i32 + modifier,
        critical: d20.is_natural_20(),
        d20,
        modifier,
    }
}

/// Ability modifier plus proficiency, if any, for a check.
pub fn check_modifier(kind: &CheckKind, player: &PlayerState) -> i32 {
    let Some(ability) = kind.ability() else {
        return 0;
    };
    let proficient = match kind {
        CheckKind::Skill(skill) => {
            player.is_skill_proficient(*skill) || player.is_save_proficient(ability)
        }
        _ => player.is_save_proficient(ability),
    };
    let base = player.ability_scores.modifier(ability);
    if proficient {
        base + player.proficiency_bonus
    } else {
        base
    }
}

/// Resolve a weapon attack.
///
/// Finesse weapons use dexterity only when it beats strength. A natural 20
/// is a critical hit and doubles the damage dice.
pub fn resolve_attack<R: Rng>(
    weapon: &str,
    target: &str,
    player: &PlayerState,
    advantage: Advantage,
    book: &RuleBook,
    rng: &mut R,
) -> AttackOutcome {
    let entry = book
        .find_weapon(weapon)
        .cloned()
        .unwrap_or_else(WeaponEntry::unarmed);

    let scores = &player.ability_scores;
    let ability = if entry.finesse && scores.dexterity > scores.strength {
        Ability::Dexterity
    } else {
        Ability::Strength
    };
    let ability_mod = scores.modifier(ability);
    let attack_bonus = ability_mod + player.proficiency_bonus;

    let d20 = roll_d20(advantage, rng);
    let critical = d20.is_natural_20();

    let dice = DiceSpec::parse(&entry.damage).unwrap_or(DiceSpec::Constant(1));
    let mut damage_roll = dice.roll(rng);
    if critical {
        let extra = dice.roll(rng);
        damage_roll.rolls.extend(extra.rolls);
        damage_roll.total += extra.total;
    }

    AttackOutcome {
        weapon: entry.name,
        target: target.to_string(),
        advantage,
        attack_total: d20.chosen as i32 + attack_bonus,
        d20,
        ability,
        attack_bonus,
        critical,
        damage_rolls: damage_roll.rolls,
        damage_modifier: ability_mod,
        damage: (damage_roll.total + ability_mod).max(1),
    }
}

/// Resolve whichever mechanic `choice` asks for.
pub fn resolve_choice<R: Rng>(
    choice: &ActionChoice,
    player: &PlayerState,
    book: &RuleBook,
    rng: &mut R,
) -> RollOutcome {
    match choice {
        ActionChoice::Attack {
            weapon,
            target,
            modifier,
        } => RollOutcome::Attack(resolve_attack(weapon, target, player, *modifier, book, rng)),
        ActionChoice::Roll {
            skill,
            description,
            modifier,
        } => RollOutcome::Check(roll_check(skill, description, player, *modifier, rng)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::AbilityScores;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fighter() -> PlayerState {
        let mut player = PlayerState {
            ability_scores: AbilityScores::new(16, 12, 14, 8, 10, 10),
            proficiency_bonus: 2,
            ..PlayerState::default()
        };
        player.skill_proficiencies.insert("Athletics".into(), true);
        player
            .saving_throw_proficiencies
            .insert("Constitution".into(), true);
        player
    }

    #[test]
    fn test_ability_modifier_floors() {
        assert_eq!(ability_modifier(10), 0);
        assert_eq!(ability_modifier(11), 0);
        assert_eq!(ability_modifier(9), -1);
        assert_eq!(ability_modifier(8), -1);
        assert_eq!(ability_modifier(1), -5);
        assert_eq!(ability_modifier(20), 5);
    }

    #[test]
    fn test_check_modifiers() {
        let player = fighter();
        assert_eq!(check_modifier(&CheckKind::parse("Athletics"), &player), 5);
        assert_eq!(check_modifier(&CheckKind::parse("Stealth"), &player), 1);
        assert_eq!(check_modifier(&CheckKind::parse("CON save"), &player), 4);
        assert_eq!(check_modifier(&CheckKind::parse("Intelligence"), &player), -1);
        assert_eq!(check_modifier(&CheckKind::parse("Basket weaving"), &player), 0);
    }

    #[test]
    fn test_save_proficiency_covers_its_skills() {
        let mut player = PlayerState {
            proficiency_bonus: 2,
            ..PlayerState::default()
        };
        player
            .saving_throw_proficiencies
            .insert("Dexterity".into(), true);

        assert_eq!(check_modifier(&CheckKind::parse("Stealth"), &player), 2);
        assert_eq!(check_modifier(&CheckKind::parse("Acrobatics"), &player), 2);
        assert_eq!(check_modifier(&CheckKind::parse("Athletics"), &player), 0);
        assert_eq!(check_modifier(&CheckKind::parse("Dexterity"), &player), 2);
    }

    #[test]
    fn test_roll_check_total() {
        let player = fighter();
        let mut rng = StdRng::seed_from_u64(3);
        let outcome = roll_check("Athletics", "climb", &player, Advantage::Normal, &mut rng);
        assert_eq!(outcome.total, outcome.d20.chosen as i32 + 5);
        assert_eq!(outcome.critical, outcome.d20.chosen == 20);
        assert!(outcome.to_string().starts_with("Athletics check (climb): rolled"));
    }

    #[test]
    fn test_finesse_prefers_higher_dex() {
        let book = RuleBook::standard();
        let mut player = PlayerState {
            ability_scores: AbilityScores::new(8, 18, 10, 10, 10, 10),
            ..PlayerState::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let rapier = resolve_attack("Rapier", "the guard", &player, Advantage::Normal, &book, &mut rng);
        assert_eq!(rapier.damage_modifier, 4);
        assert_eq!(rapier.attack_bonus, 6);

        let club = resolve_attack("Club", "the guard", &player, Advantage::Normal, &book, &mut rng);
        assert_eq!(club.damage_modifier, -1);

        assert_eq!(rapier.ability, Ability::Dexterity);
        assert_eq!(club.ability, Ability::Strength);

        player.ability_scores.strength = 18;
        let tie = resolve_attack("Rapier", "the guard", &player, Advantage::Normal, &book, &mut rng);
        assert_eq!(tie.ability, Ability::Strength);

        // Same modifier either way, so only the chosen ability tells them apart.
        player.ability_scores = AbilityScores::new(16, 17, 10, 10, 10, 10);
        let higher = resolve_attack("Rapier", "the guard", &player, Advantage::Normal, &book, &mut rng);
        assert_eq!(higher.ability, Ability::Dexterity);
        assert_eq!(higher.damage_modifier, 3);

        player.ability_scores = AbilityScores::new(17, 16, 10, 10, 10, 10);
        let lower = resolve_attack("Rapier", "the guard", &player, Advantage::Normal, &book, &mut rng);
        assert_eq!(lower.ability, Ability::Strength);
    }

    #[test]
    fn test_weapon_lookup_strips_bonus() {
        let book = RuleBook::standard();
        let player = fighter();
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = resolve_attack("Longsword +1", "ogre", &player, Advantage::Normal, &book, &mut rng);
        assert_eq!(outcome.weapon, "Longsword");
        assert_eq!(outcome.attack_bonus, 5);
    }

    #[test]
    fn test_critical_doubles_dice() {
        let book = RuleBook::standard();
        let player = fighter();
        for seed in 0..500 {
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = resolve_attack("Greatsword", "troll", &player, Advantage::Normal, &book, &mut rng);
            let expected = if outcome.critical { 4 } else { 2 };
            assert_eq!(outcome.damage_rolls.len(), expected);
            assert_eq!(outcome.critical, outcome.d20.chosen == 20);
        }
    }

    #[test]
    fn test_damage_floor() {
        let book = RuleBook::standard();
        let player = PlayerState {
            ability_scores: AbilityScores::new(1, 1, 10, 10, 10, 10),
            ..PlayerState::default()
        };
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = resolve_attack("Dagger", "rat", &player, Advantage::Normal, &book, &mut rng);
            assert!(outcome.damage >= 1);
            if !outcome.critical {
                assert_eq!(outcome.damage, 1);
            }
        }
    }

    #[test]
    fn test_unknown_weapon_is_unarmed() {
        let book = RuleBook::standard();
        let player = fighter();
        let mut rng = StdRng::seed_from_u64(9);
        let outcome = resolve_attack("harsh language", "bard", &player, Advantage::Normal, &book, &mut rng);
        assert_eq!(outcome.weapon, "Unarmed Strike");
        assert!(outcome.damage_rolls.is_empty());
        let expected = if outcome.critical { 5 } else { 4 };
        assert_eq!(outcome.damage, expected);
    }

    #[test]
    fn test_resolve_choice_dispatch() {
        let book = RuleBook::standard();
        let player = fighter();
        let mut rng = StdRng::seed_from_u64(1);
        let choice = ActionChoice::Roll {
            skill: "Perception".into(),
            description: "spot the trap".into(),
            modifier: Advantage::Advantage,
        };
        match resolve_choice(&choice, &player, &book, &mut rng) {
            RollOutcome::Check(check) => {
                assert_eq!(check.label, "Perception");
                assert_eq!(check.d20.rolls.len(), 2);
            }
            RollOutcome::Attack(_) => panic!("expected a check"),
        }
    }
}
