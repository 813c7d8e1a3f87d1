//! One-shot games: a single draw settles the bet.
//!
//! [`evaluate`] is a pure function of the seed pair and the game parameters,
//! so the outcome is fixed as soon as both are known. [`OneShotEngine`] wraps
//! it with the ledger calls needed to take the wager and pay the result.

use crate::config::OneShotConfig;
use crate::errors::{EngineResult, ValidationError};
use crate::fairness::{derive_for, RevealedSeed, SeedPair};
use crate::games::dice::{self, DiceParams, DiceRoll};
use crate::games::plinko::{self, PlinkoDrop, PlinkoParams};
use crate::games::slots::{self, SlotsSpin};
use crate::games::types::{payout_for, validate_wager, GameKind};
use crate::ledger::{credit_and_record, debit_and_record, Ledger, LedgerEntry};
use crate::registry::SessionKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum OneShotGame {
    Dice(DiceParams),
    Plinko(PlinkoParams),
    Slots,
}

impl OneShotGame {
    pub fn kind(&self) -> GameKind {
        match self {
            OneShotGame::Dice(_) => GameKind::Dice,
            OneShotGame::Plinko(_) => GameKind::Plinko,
            OneShotGame::Slots => GameKind::Slots,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum OneShotResult {
    Dice(DiceRoll),
    Plinko(PlinkoDrop),
    Slots(SlotsSpin),
}

/// Immutable record of one play
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OneShotOutcome {
    pub game: GameKind,
    pub seed: RevealedSeed,
    /// Digest the result was read from
    pub raw_derivation: String,
    pub result: OneShotResult,
    /// Effective multiplier; zero on a loss
    pub multiplier: f64,
    pub bet: f64,
    pub payout: f64,
}

impl OneShotOutcome {
    pub fn won(&self) -> bool {
        self.payout > 0.0
    }
}

/// Evaluate a one-shot game. Same inputs, same outcome.
pub fn evaluate(
    seed: &SeedPair,
    bet: f64,
    game: &OneShotGame,
    house_edge: f64,
) -> Result<OneShotOutcome, ValidationError> {
    validate_wager(bet)?;

    let (result, multiplier) = match game {
        OneShotGame::Dice(params) => {
            let roll = dice::evaluate(seed, params, house_edge)?;
            let multiplier = if roll.won { roll.multiplier } else { 0.0 };
            (OneShotResult::Dice(roll), multiplier)
        }
        OneShotGame::Plinko(params) => {
            let drop = plinko::evaluate(seed, params)?;
            let multiplier = drop.multiplier;
            (OneShotResult::Plinko(drop), multiplier)
        }
        OneShotGame::Slots => {
            let spin = slots::evaluate(seed)?;
            let multiplier = spin.multiplier;
            (OneShotResult::Slots(spin), multiplier)
        }
    };

    Ok(OneShotOutcome {
        game: game.kind(),
        seed: seed.reveal(),
        raw_derivation: derive_for(seed, None),
        result,
        multiplier,
        bet,
        payout: payout_for(bet, multiplier),
    })
}

/// Ledger-backed one-shot play
pub struct OneShotEngine {
    config: OneShotConfig,
    ledger: Arc<dyn Ledger>,
}

impl OneShotEngine {
    pub fn new(config: OneShotConfig, ledger: Arc<dyn Ledger>) -> Self {
        Self { config, ledger }
    }

    /// Take the wager, evaluate, then pay or record the loss.
    ///
    /// If settlement fails the wager is refunded before the error is
    /// returned.
    pub fn play(&self, player_id: &str, seed: &SeedPair, bet: f64, game: OneShotGame) -> EngineResult<OneShotOutcome> {
        let outcome = evaluate(seed, bet, &game, self.config.house_edge)?;
        let kind = game.kind();
        let reference = SessionKey::new(player_id, kind, seed.nonce()).to_string();

        debit_and_record(self.ledger.as_ref(), &LedgerEntry::wager(player_id, kind, &reference, bet))?;

        let settled = if outcome.payout > 0.0 {
            let entry = LedgerEntry::payout(player_id, kind, &reference, bet, outcome.payout);
            credit_and_record(self.ledger.as_ref(), &entry)
        } else {
            self.ledger
                .record_transaction(&LedgerEntry::loss(player_id, kind, &reference, bet))
        };

        if let Err(e) = settled {
            let refund = LedgerEntry::refund(player_id, kind, &reference, bet);
            if let Err(refund_error) = credit_and_record(self.ledger.as_ref(), &refund) {
                error!(
                    player_id,
                    reference = %reference,
                    bet,
                    "Refund after failed settlement also failed: {}",
                    refund_error
                );
            }
            return Err(e.into());
        }

        info!(
            player_id,
            game = %kind,
            bet,
            multiplier = outcome.multiplier,
            payout = outcome.payout,
            "One-shot game settled"
        );
        Ok(outcome)
    }
}
