//! Dice rolling.
//!
//! Supports `NdM` notation (`2d6`, `d8`) and bare constants (`1`). The random
//! source is always injected so rolls are reproducible under a seeded RNG.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Advantage state for d20 rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl fmt::Display for Advantage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Advantage::Normal => "NONE",
            Advantage::Advantage => "ADVANTAGE",
            Advantage::Disadvantage => "DISADVANTAGE",
        };
        write!(f, "{text}")
    }
}

/// Individual dice and their sum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    pub rolls: Vec<u32>,
    pub total: i32,
}

/// Parsed form of a dice notation string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiceSpec {
    Dice { count: u32, sides: u32 },
    Constant(i32),
}

impl DiceSpec {
    /// Parse `NdM`, `dM`, or an integer constant.
    pub fn parse(notation: &str) -> Option<Self> {
        let notation = notation.trim().to_lowercase();
        if let Some((count, sides)) = notation.split_once('d') {
            let count = if count.trim().is_empty() {
                1
            } else {
                count.trim().parse().ok()?
            };
            let sides: u32 = sides.trim().parse().ok()?;
            if count == 0 || sides == 0 {
                return None;
            }
            return Some(DiceSpec::Dice { count, sides });
        }
        notation.parse().ok().map(DiceSpec::Constant)
    }

    pub fn roll<R: Rng>(&self, rng: &mut R) -> DiceRoll {
        match *self {
            DiceSpec::Dice { count, sides } => {
                let rolls: Vec<u32> = (0..count).map(|_| rng.gen_range(1..=sides)).collect();
                let total = rolls.iter().map(|r| *r as i32).sum();
                DiceRoll { rolls, total }
            }
            DiceSpec::Constant(value) => DiceRoll {
                rolls: Vec::new(),
                total: value,
            },
        }
    }
}

/// Roll dice from notation. Unrecognized notation rolls zero.
pub fn roll_dice<R: Rng>(notation: &str, rng: &mut R) -> DiceRoll {
    match DiceSpec::parse(notation) {
        Some(spec) => spec.roll(rng),
        None => {
            tracing::debug!(notation, "unrecognized dice notation, rolling zero");
            DiceRoll::default()
        }
    }
}

/// A d20 roll, possibly rolled twice for advantage or disadvantage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct D20Roll {
    pub rolls: Vec<u32>,
    pub chosen: u32,
}

impl D20Roll {
    /// Pick from already-rolled dice under `advantage`.
    pub fn from_rolls(first: u32, second: u32, advantage: Advantage) -> Self {
        match advantage {
            Advantage::Normal => Self {
                rolls: vec![first],
                chosen: first,
            },
            Advantage::Advantage => Self {
                rolls: vec![first, second],
                chosen: first.max(second),
            },
            Advantage::Disadvantage => Self {
                rolls: vec![first, second],
                chosen: first.min(second),
            },
        }
    }

    pub fn is_natural_20(&self) -> bool {
        self.chosen == 20
    }

    pub fn is_natural_1(&self) -> bool {
        self.chosen == 1
    }
}

/// Roll 1d20, twice under advantage or disadvantage.
pub fn roll_d20<R: Rng>(advantage: Advantage, rng: &mut R) -> D20Roll {
    let first = rng.gen_range(1..=20u32);
    match advantage {
        Advantage::Normal => D20Roll::from_rolls(first, first, advantage),
        Advantage::Advantage | Advantage::Disadvantage => {
            let second = rng.gen_range(1..=20u32);
            D20Roll::from_rolls(first, second, advantage)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_notation() {
        assert_eq!(DiceSpec::parse("2d6"), Some(DiceSpec::Dice { count: 2, sides: 6 }));
        assert_eq!(DiceSpec::parse("d8"), Some(DiceSpec::Dice { count: 1, sides: 8 }));
        assert_eq!(DiceSpec::parse(" 1D12 "), Some(DiceSpec::Dice { count: 1, sides: 12 }));
        assert_eq!(DiceSpec::parse("1"), Some(DiceSpec::Constant(1)));
        assert_eq!(DiceSpec::parse("lots"), None);
        assert_eq!(DiceSpec::parse("0d6"), None);
    }

    #[test]
    fn test_roll_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let roll = roll_dice("3d6", &mut rng);
            assert_eq!(roll.rolls.len(), 3);
            assert!((3..=18).contains(&roll.total));
        }
    }

    #[test]
    fn test_constant_roll() {
        let mut rng = StdRng::seed_from_u64(1);
        let roll = roll_dice("4", &mut rng);
        assert!(roll.rolls.is_empty());
        assert_eq!(roll.total, 4);
    }

    #[test]
    fn test_unrecognized_rolls_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(roll_dice("a handful", &mut rng), DiceRoll::default());
    }

    #[test]
    fn test_advantage_picks_higher() {
        let adv = D20Roll::from_rolls(4, 17, Advantage::Advantage);
        assert_eq!(adv.chosen, 17);
        assert_eq!(adv.rolls, vec![4, 17]);

        let dis = D20Roll::from_rolls(4, 17, Advantage::Disadvantage);
        assert_eq!(dis.chosen, 4);

        let normal = D20Roll::from_rolls(4, 17, Advantage::Normal);
        assert_eq!(normal.rolls, vec![4]);
    }

    #[test]
    fn test_roll_d20_counts() {
        let mut rng = StdRng::seed_from_u64(42);
        assert_eq!(roll_d20(Advantage::Normal, &mut rng).rolls.len(), 1);
        assert_eq!(roll_d20(Advantage::Advantage, &mut rng).rolls.len(), 2);
    }
}
