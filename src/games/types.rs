use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance absorbed before flooring so binary representation error
/// (e.g. 10.0 * 2.567 = 25.669999…) never costs the player a cent.
const FLOOR_EPSILON: f64 = 1e-9;

/// Supported game types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Crash,
    Dice,
    Plinko,
    Slots,
    Mines,
    Towers,
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::Crash => write!(f, "crash"),
            GameKind::Dice => write!(f, "dice"),
            GameKind::Plinko => write!(f, "plinko"),
            GameKind::Slots => write!(f, "slots"),
            GameKind::Mines => write!(f, "mines"),
            GameKind::Towers => write!(f, "towers"),
        }
    }
}

/// Floor to `places` decimals.
pub fn floor_to_places(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale + FLOOR_EPSILON).floor() / scale
}

/// Floor to whole cents: every payout goes through here.
pub fn floor_to_cents(value: f64) -> f64 {
    floor_to_places(value, 2)
}

/// `floor(amount × multiplier × 100) / 100`
pub fn payout_for(amount: f64, multiplier: f64) -> f64 {
    floor_to_cents(amount * multiplier)
}

/// Round (not floor) to cents, used for balance bookkeeping only.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reject non-finite, zero or negative wagers.
pub fn validate_wager(amount: f64) -> Result<(), ValidationError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ValidationError::InvalidAmount(amount));
    }
    Ok(())
}

/// House edge must leave a positive return.
pub fn validate_house_edge(edge: f64) -> Result<(), ValidationError> {
    if !edge.is_finite() || !(0.0..1.0).contains(&edge) {
        return Err(ValidationError::InvalidParameters(format!(
            "house edge must be within [0, 1), got {}",
            edge
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payout_floors_to_cents() {
        assert_eq!(payout_for(10.0, 2.567), 25.67);
        assert_eq!(payout_for(1.0, 1.999), 1.99);
        assert_eq!(payout_for(3.0, 1.0), 3.0);
    }

    #[test]
    fn test_floor_to_places() {
        assert_eq!(floor_to_places(1.980396, 4), 1.9803);
        assert_eq!(floor_to_places(0.99 / 0.5, 4), 1.98);
    }

    #[test]
    fn test_wager_validation() {
        assert!(validate_wager(0.01).is_ok());
        assert!(validate_wager(0.0).is_err());
        assert!(validate_wager(-5.0).is_err());
        assert!(validate_wager(f64::NAN).is_err());
        assert!(validate_wager(f64::INFINITY).is_err());
    }

    #[test]
    fn test_game_kind_display() {
        assert_eq!(GameKind::Towers.to_string(), "towers");
        assert_eq!(serde_json::to_string(&GameKind::Crash).unwrap(), "\"crash\"");
    }
}
