//! Dice: roll 0.00..=99.99, win above or below a chosen target.

use crate::errors::ValidationError;
use crate::fairness::{bounded_ints, Draw, SeedPair};
use crate::games::types::{floor_to_places, validate_house_edge};
use serde::{Deserialize, Serialize};

/// First five hex chars, reduced to 10 000 two-decimal steps
const ROLL_DRAW: Draw = Draw::sequence(1, 10_000, 5);

pub const MIN_TARGET: f64 = 1.0;
pub const MAX_TARGET: f64 = 99.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DiceParams {
    pub target: f64,
    /// Win when the roll is above the target (otherwise below)
    pub over: bool,
}

impl DiceParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.target.is_finite() || !(MIN_TARGET..=MAX_TARGET).contains(&self.target) {
            return Err(ValidationError::InvalidParameters(format!(
                "dice target must be within [{}, {}], got {}",
                MIN_TARGET, MAX_TARGET, self.target
            )));
        }
        Ok(())
    }

    /// Chance of winning on a continuous 0..100 scale.
    pub fn win_probability(&self) -> f64 {
        if self.over {
            (100.0 - self.target) / 100.0
        } else {
            self.target / 100.0
        }
    }

    /// `floor((1 - edge) / p, 4 places)`
    pub fn multiplier(&self, house_edge: f64) -> f64 {
        floor_to_places((1.0 - house_edge) / self.win_probability(), 4)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiceRoll {
    pub roll: f64,
    pub target: f64,
    pub over: bool,
    pub win_probability: f64,
    pub won: bool,
    /// Paid multiplier if the roll wins
    pub multiplier: f64,
}

/// The raw roll for a seed pair.
pub fn roll(seed: &SeedPair) -> Result<f64, ValidationError> {
    let value = bounded_ints(seed, None, ROLL_DRAW)?[0];
    Ok(value as f64 / 100.0)
}

pub fn evaluate(seed: &SeedPair, params: &DiceParams, house_edge: f64) -> Result<DiceRoll, ValidationError> {
    params.validate()?;
    validate_house_edge(house_edge)?;

    let roll = roll(seed)?;
    let won = if params.over {
        roll > params.target
    } else {
        roll < params.target
    };

    Ok(DiceRoll {
        roll,
        target: params.target,
        over: params.over,
        win_probability: params.win_probability(),
        won,
        multiplier: params.multiplier(house_edge),
    })
}
