//! The text protocol between narrator model and game: tag grammar, JSON
//! recovery and rule lookups, exercised end to end on realistic model output.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tale_core::character::Ability;
use tale_core::dice::Advantage;
use tale_core::resolver::{resolve_attack, resolve_choice};
use tale_core::{
    extract_tags, recover_json, sanitize_for_display, ActionChoice, PlayerState, RollOutcome,
    RuleBook,
};

// =============================================================================
// TAGS
// =============================================================================

#[test]
fn test_roll_tag_with_disadvantage() {
    let tags = extract_tags("Roll: [ROLL|Stealth|sneak past|DISADVANTAGE]");

    assert_eq!(tags.choices.len(), 1);
    match &tags.choices[0] {
        ActionChoice::Roll {
            skill,
            description,
            modifier,
        } => {
            assert_eq!(skill, "Stealth");
            assert_eq!(description, "sneak past");
            assert_eq!(*modifier, Advantage::Disadvantage);
        }
        other => panic!("expected a roll, got {other:?}"),
    }
}

#[test]
fn test_realistic_reply() {
    let reply = "The guard squints at you.\n\n\
        [STATE_UPDATE]\n{\"location\": \"North Gate\",\n \"currency\": {\"gp\": 12,},}\n[/STATE_UPDATE]\n\
        You could slip by, talk your way through, or draw steel:\n\
        - [ROLL|Stealth|slip past the guard|NONE]\n\
        - [ROLL|Persuasion|talk your way in|ADVANTAGE]\n\
        - [ATTACK|Rapier|the guard|NONE]";

    let tags = extract_tags(reply);
    assert_eq!(tags.choices.len(), 3);
    assert_eq!(tags.state_updates.len(), 1);

    let patch = recover_json(&tags.state_updates[0]).unwrap();
    assert_eq!(patch, json!({"location": "North Gate", "currency": {"gp": 12}}));

    let shown = sanitize_for_display(reply);
    assert!(shown.starts_with("The guard squints at you."));
    assert!(!shown.contains('['));
    assert!(!shown.contains("North Gate"));
}

// =============================================================================
// JSON RECOVERY
// =============================================================================

#[test]
fn test_state_update_with_trailing_comma() {
    let tags = extract_tags(r#"[STATE_UPDATE]{"health": {"current": 10,}}[/STATE_UPDATE]"#);
    let value = recover_json(&tags.state_updates[0]).unwrap();
    assert_eq!(value, json!({"health": {"current": 10}}));
}

#[test]
fn test_fenced_sheet_with_prose() {
    let raw = "Here is the character:\n```json\n{\n  \"name\": \"Mira\",\n  \"notes\": \"line one\nline two\",\n  \"level\": 1,\n}\n```\nEnjoy!";
    let value = recover_json(raw).unwrap();
    assert_eq!(value["notes"], "line one\nline two");
    assert_eq!(value["level"], 1);
}

#[test]
fn test_recovered_patch_applies_to_sheet() {
    let mut player = PlayerState::default();
    player.health.max = 20;
    let patch = recover_json(r#"{"health": {"current": 25,},}"#).unwrap();

    player.apply_patch(&patch).unwrap();

    assert_eq!(player.health.current, 20);
}

// =============================================================================
// RULES
// =============================================================================

#[test]
fn test_enhanced_weapon_matches_base_entry() {
    let book = RuleBook::standard();
    let entry = book.find_weapon("Longsword +1").unwrap();
    assert_eq!(entry.name, "Longsword");
    assert!(!entry.finesse);
}

#[test]
fn test_non_finesse_attack_uses_strength() {
    let book = RuleBook::standard();
    let mut player = PlayerState::default();
    player.ability_scores.strength = 10;
    player.ability_scores.dexterity = 18;
    let mut rng = StdRng::seed_from_u64(11);

    let outcome = resolve_attack(
        "Longsword +1",
        "the ogre",
        &player,
        Advantage::Normal,
        &book,
        &mut rng,
    );

    assert_eq!(outcome.weapon, "Longsword");
    assert_eq!(outcome.ability, Ability::Strength);
    assert_eq!(outcome.attack_bonus, player.proficiency_bonus);
    assert_eq!(outcome.damage_modifier, 0);
    assert!(outcome.damage_rolls.iter().all(|r| (1..=8).contains(r)));
    assert!(outcome.damage >= 1);
}

#[test]
fn test_tag_to_outcome() {
    let book = RuleBook::standard();
    let player = PlayerState::default();
    let mut rng = StdRng::seed_from_u64(3);
    let tags = extract_tags("[ATTACK|Longsword +1|the ogre|ADVANTAGE]");

    let outcome = resolve_choice(&tags.choices[0], &player, &book, &mut rng);

    match outcome {
        RollOutcome::Attack(attack) => {
            assert_eq!(attack.d20.rolls.len(), 2);
            assert_eq!(attack.d20.chosen, *attack.d20.rolls.iter().max().unwrap());
            assert!(attack.to_string().starts_with("Attack on the ogre with Longsword"));
        }
        other => panic!("expected an attack, got {other:?}"),
    }
}

#[test]
fn test_save_proficiency_applies_to_tagged_skill_check() {
    let book = RuleBook::standard();
    let mut player = PlayerState::default();
    player.ability_scores.dexterity = 14;
    player
        .saving_throw_proficiencies
        .insert("Dexterity".into(), true);
    let mut rng = StdRng::seed_from_u64(5);
    let tags = extract_tags("You press into the shadows. [ROLL|Stealth|slip past the watch|NONE]");

    let outcome = resolve_choice(&tags.choices[0], &player, &book, &mut rng);

    match outcome {
        RollOutcome::Check(check) => {
            assert_eq!(check.label, "Stealth");
            assert_eq!(check.advantage, Advantage::Normal);
            assert_eq!(check.modifier, 2 + player.proficiency_bonus);
            assert_eq!(check.total, check.d20.chosen as i32 + check.modifier);
        }
        other => panic!("expected a check, got {other:?}"),
    }
}
