//! Crash: one shared round whose multiplier climbs until a pre-committed
//! crash point.
//!
//! Rounds move BETTING -> FLYING -> CRASHED. The engine only checks that a
//! transition is legal; an external orchestrator decides when to call
//! [`CrashEngine::start_flying`] and [`CrashEngine::finalize_round`].
//!
//! Observers never receive per-tick updates. They get `fly_started_at` and
//! compute `exp(k * t)` locally, so every client draws the same curve.
//!
//! Locking: the slot holding the current round is always taken before a
//! round's own lock, never the other way round.

use crate::clock::Clock;
use crate::config::CrashConfig;
use crate::errors::{EngineResult, StateConflict, ValidationError};
use crate::fairness::{bounded_ints, Draw, RevealedSeed, SeedCommitment, SeedPair};
use crate::games::types::{floor_to_cents, payout_for, validate_wager, GameKind};
use crate::ledger::{credit_and_record, debit_and_record, Ledger, LedgerEntry};
use crate::registry::lock_unpoisoned;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One in 33 rounds busts at 1.00x
pub const INSTANT_BUST_DIVISOR: u64 = 33;

const ENTROPY_BITS: u32 = 52;
/// First 13 hex chars of the digest = 52 bits
const CRASH_DRAW: Draw = Draw::sequence(1, 1 << ENTROPY_BITS, 13);

/// The 52-bit value a round's crash point is computed from.
pub fn crash_entropy(seed: &SeedPair) -> Result<u64, ValidationError> {
    Ok(bounded_ints(seed, None, CRASH_DRAW)?[0])
}

/// Crash point for a 52-bit entropy value `h`.
///
/// `h % 33 == 0` busts instantly; otherwise the point is
/// `floor((100 * 2^52 - h) / (2^52 - h)) / 100`, computed in integers.
pub fn crash_point_from_entropy(h: u64) -> f64 {
    if h % INSTANT_BUST_DIVISOR == 0 {
        return 1.0;
    }
    let e = 1u128 << ENTROPY_BITS;
    let h = u128::from(h) & (e - 1);
    let cents = ((100 * e - h) / (e - h)).max(100);
    cents as f64 / 100.0
}

/// Replay a round's crash point from its seed pair.
pub fn crash_point_for(seed: &SeedPair) -> Result<f64, ValidationError> {
    Ok(crash_point_from_entropy(crash_entropy(seed)?))
}

/// `exp(k * t)`
pub fn curve_multiplier(growth_rate: f64, elapsed: Duration) -> f64 {
    (growth_rate * elapsed.as_secs_f64()).exp()
}

/// Time for the curve to reach `multiplier`. Zero for non-finite input or a
/// flat curve; saturates at `Duration::MAX`.
pub fn curve_delay(growth_rate: f64, multiplier: f64) -> Duration {
    if !multiplier.is_finite() || multiplier <= 1.0 || !(growth_rate > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(multiplier.ln() / growth_rate).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    Betting,
    Flying,
    Crashed,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RoundPhase::Betting => "BETTING",
            RoundPhase::Flying => "FLYING",
            RoundPhase::Crashed => "CRASHED",
        };
        f.write_str(label)
    }
}

/// A player's stake in one round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrashBet {
    pub player_id: String,
    pub amount: f64,
    pub cashed_out: bool,
    pub cashout_multiplier: Option<f64>,
    pub payout: Option<f64>,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CrashRound {
    id: Uuid,
    number: u64,
    phase: RoundPhase,
    seed: SeedPair,
    crash_point: f64,
    created_at: DateTime<Utc>,
    fly_started_at: Option<DateTime<Utc>>,
    crashed_at: Option<DateTime<Utc>>,
    bets: BTreeMap<String, CrashBet>,
    voided: bool,
}

impl CrashRound {
    fn wrong_phase(&self, expected: RoundPhase) -> StateConflict {
        StateConflict::WrongPhase {
            expected: expected.to_string(),
            actual: self.phase.to_string(),
        }
    }

    fn snapshot(&self) -> RoundSnapshot {
        let crashed = self.phase == RoundPhase::Crashed;
        RoundSnapshot {
            id: self.id,
            number: self.number,
            phase: self.phase,
            commitment: self.seed.commitment(),
            crash_point: crashed.then_some(self.crash_point),
            reveal: crashed.then(|| self.seed.reveal()),
            created_at: self.created_at,
            fly_started_at: self.fly_started_at,
            crashed_at: self.crashed_at,
            voided: self.voided,
            players: self.bets.values().cloned().collect(),
        }
    }
}

/// What observers see; the crash point and seed only once CRASHED
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSnapshot {
    pub id: Uuid,
    pub number: u64,
    pub phase: RoundPhase,
    pub commitment: SeedCommitment,
    pub crash_point: Option<f64>,
    pub reveal: Option<RevealedSeed>,
    pub created_at: DateTime<Utc>,
    pub fly_started_at: Option<DateTime<Utc>>,
    pub crashed_at: Option<DateTime<Utc>>,
    pub voided: bool,
    pub players: Vec<CrashBet>,
}

/// Result of [`CrashEngine::finalize_round`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSettlement {
    pub round_id: Uuid,
    pub number: u64,
    pub crash_point: f64,
    pub reveal: RevealedSeed,
    /// Bets cashed out before the crash (already credited)
    pub winners: Vec<CrashBet>,
    /// Bets still riding at the crash
    pub losers: Vec<CrashBet>,
    /// Loss entries the ledger refused to record
    pub unrecorded: Vec<LedgerEntry>,
}

type RoundHandle = Arc<Mutex<CrashRound>>;

/// Owner of the single live crash round
pub struct CrashEngine {
    config: CrashConfig,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<RoundHandle>>,
    history: Mutex<VecDeque<f64>>,
    rounds_created: AtomicU64,
    unsettled_refunds: Mutex<Vec<LedgerEntry>>,
}

impl CrashEngine {
    pub fn new(mut config: CrashConfig, ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Self {
        if !config.growth_rate.is_finite() || config.growth_rate <= 0.0 {
            let fallback = CrashConfig::default().growth_rate;
            warn!(growth_rate = config.growth_rate, fallback, "Invalid crash growth rate, using default");
            config.growth_rate = fallback;
        }
        Self {
            history: Mutex::new(VecDeque::with_capacity(config.history_len)),
            config,
            ledger,
            clock,
            current: Mutex::new(None),
            rounds_created: AtomicU64::new(0),
            unsettled_refunds: Mutex::new(Vec::new()),
        }
    }

    fn spawn_round(&self) -> Result<RoundHandle, ValidationError> {
        let number = self.rounds_created.fetch_add(1, Ordering::SeqCst) + 1;
        let seed = SeedPair::generate(self.config.client_seed.as_str(), number);
        let crash_point = crash_point_for(&seed)?;
        let round = CrashRound {
            id: Uuid::new_v4(),
            number,
            phase: RoundPhase::Betting,
            seed,
            crash_point,
            created_at: self.clock.now(),
            fly_started_at: None,
            crashed_at: None,
            bets: BTreeMap::new(),
            voided: false,
        };

        info!(
            round_id = %round.id,
            number,
            seed_hash = %round.seed.server_seed_hash(),
            "Crash round created"
        );
        Ok(Arc::new(Mutex::new(round)))
    }

    fn is_stale(&self, round: &CrashRound) -> bool {
        round.phase == RoundPhase::Betting
            && self.clock.now() - round.created_at > self.config.stale_betting_timeout()
    }

    /// Refund every bet of a stuck BETTING round and close it.
    fn void_round(&self, round: &mut CrashRound) {
        round.phase = RoundPhase::Crashed;
        round.voided = true;
        round.crashed_at = Some(self.clock.now());

        let reference = round.id.to_string();
        for bet in round.bets.values() {
            let refund = LedgerEntry::refund(&bet.player_id, GameKind::Crash, &reference, bet.amount);
            if let Err(e) = credit_and_record(self.ledger.as_ref(), &refund) {
                error!(
                    round_id = %round.id,
                    player_id = %bet.player_id,
                    amount = bet.amount,
                    "Refund for voided round failed: {}",
                    e
                );
                lock_unpoisoned(&self.unsettled_refunds).push(refund);
            }
        }

        warn!(round_id = %round.id, bets = round.bets.len(), "Stale betting round voided");
    }

    /// The live round, replacing a missing, crashed or stale one.
    fn live_round(&self) -> EngineResult<RoundHandle> {
        let mut slot = lock_unpoisoned(&self.current);

        if let Some(handle) = slot.as_ref() {
            let mut round = lock_unpoisoned(handle);
            if self.is_stale(&round) {
                self.void_round(&mut round);
            }
            if round.phase != RoundPhase::Crashed {
                return Ok(handle.clone());
            }
        }

        let handle = self.spawn_round()?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    fn existing_round(&self) -> Result<RoundHandle, StateConflict> {
        lock_unpoisoned(&self.current).clone().ok_or(StateConflict::NoRound)
    }

    /// Open a new round. Fails while the current one is still live.
    pub fn create_round(&self) -> EngineResult<RoundSnapshot> {
        let mut slot = lock_unpoisoned(&self.current);
        if let Some(handle) = slot.as_ref() {
            if lock_unpoisoned(handle).phase != RoundPhase::Crashed {
                return Err(StateConflict::RoundInProgress.into());
            }
        }

        let handle = self.spawn_round()?;
        let snapshot = lock_unpoisoned(&handle).snapshot();
        *slot = Some(handle);
        Ok(snapshot)
    }

    /// Snapshot of the live round, creating one when needed.
    pub fn current_round(&self) -> EngineResult<RoundSnapshot> {
        let handle = self.live_round()?;
        let snapshot = lock_unpoisoned(&handle).snapshot();
        Ok(snapshot)
    }

    /// Snapshot of whatever round is in the slot, without side effects.
    pub fn snapshot(&self) -> Option<RoundSnapshot> {
        let handle = lock_unpoisoned(&self.current).clone()?;
        let snapshot = lock_unpoisoned(&handle).snapshot();
        Some(snapshot)
    }

    /// BETTING -> FLYING. Repeating the call while FLYING is a no-op.
    pub fn start_flying(&self) -> EngineResult<RoundSnapshot> {
        let handle = self.existing_round()?;
        let mut round = lock_unpoisoned(&handle);

        match round.phase {
            RoundPhase::Betting => {
                round.phase = RoundPhase::Flying;
                round.fly_started_at = Some(self.clock.now());
                info!(round_id = %round.id, bets = round.bets.len(), "Crash round flying");
            }
            RoundPhase::Flying => {}
            RoundPhase::Crashed => return Err(round.wrong_phase(RoundPhase::Betting).into()),
        }
        Ok(round.snapshot())
    }

    /// Place the player's single bet for the current round.
    pub fn place_bet(&self, player_id: &str, amount: f64) -> EngineResult<CrashBet> {
        validate_wager(amount)?;
        if amount < self.config.min_bet || amount > self.config.max_bet {
            return Err(ValidationError::AmountOutOfRange {
                amount,
                min: self.config.min_bet,
                max: self.config.max_bet,
            }
            .into());
        }

        let handle = self.live_round()?;
        let mut round = lock_unpoisoned(&handle);

        if round.phase != RoundPhase::Betting {
            return Err(round.wrong_phase(RoundPhase::Betting).into());
        }
        if round.bets.contains_key(player_id) {
            return Err(StateConflict::BetAlreadyPlaced {
                player_id: player_id.to_string(),
            }
            .into());
        }

        let wager = LedgerEntry::wager(player_id, GameKind::Crash, &round.id.to_string(), amount);
        debit_and_record(self.ledger.as_ref(), &wager)?;

        let bet = CrashBet {
            player_id: player_id.to_string(),
            amount,
            cashed_out: false,
            cashout_multiplier: None,
            payout: None,
            placed_at: self.clock.now(),
        };
        round.bets.insert(player_id.to_string(), bet.clone());

        debug!(round_id = %round.id, player_id, amount, "Crash bet placed");
        Ok(bet)
    }

    /// Cash out at `min(claimed, crash_point)`.
    pub fn cash_out(&self, player_id: &str, claimed_multiplier: f64) -> EngineResult<CrashBet> {
        if !claimed_multiplier.is_finite() || claimed_multiplier < 1.0 {
            return Err(ValidationError::InvalidMultiplier(claimed_multiplier).into());
        }

        let handle = self.existing_round()?;
        let mut round = lock_unpoisoned(&handle);

        if round.phase != RoundPhase::Flying {
            return Err(round.wrong_phase(RoundPhase::Flying).into());
        }
        let (amount, cashed_out) = match round.bets.get(player_id) {
            Some(bet) => (bet.amount, bet.cashed_out),
            None => {
                return Err(StateConflict::NoBet {
                    player_id: player_id.to_string(),
                }
                .into())
            }
        };
        if cashed_out {
            return Err(StateConflict::AlreadyCashedOut {
                player_id: player_id.to_string(),
            }
            .into());
        }

        let effective = claimed_multiplier.min(round.crash_point);
        let payout = payout_for(amount, effective);
        let entry = LedgerEntry::payout(player_id, GameKind::Crash, &round.id.to_string(), amount, payout);
        credit_and_record(self.ledger.as_ref(), &entry)?;

        let round_id = round.id;
        let bet = round
            .bets
            .get_mut(player_id)
            .ok_or_else(|| StateConflict::NoBet {
                player_id: player_id.to_string(),
            })?;
        bet.cashed_out = true;
        bet.cashout_multiplier = Some(effective);
        bet.payout = Some(payout);

        info!(round_id = %round_id, player_id, multiplier = effective, payout, "Crash cash-out");
        Ok(bet.clone())
    }

    /// FLYING -> CRASHED: reveal the seed and split the bets.
    pub fn finalize_round(&self) -> EngineResult<RoundSettlement> {
        let handle = self.existing_round()?;
        let mut round = lock_unpoisoned(&handle);

        if round.phase != RoundPhase::Flying {
            return Err(round.wrong_phase(RoundPhase::Flying).into());
        }
        round.phase = RoundPhase::Crashed;
        round.crashed_at = Some(self.clock.now());

        let (winners, losers): (Vec<CrashBet>, Vec<CrashBet>) =
            round.bets.values().cloned().partition(|bet| bet.cashed_out);

        let reference = round.id.to_string();
        let mut unrecorded = Vec::new();
        for bet in &losers {
            let loss = LedgerEntry::loss(&bet.player_id, GameKind::Crash, &reference, bet.amount);
            if let Err(e) = self.ledger.record_transaction(&loss) {
                error!(round_id = %round.id, player_id = %bet.player_id, "Failed to record crash loss: {}", e);
                unrecorded.push(loss);
            }
        }

        {
            let mut history = lock_unpoisoned(&self.history);
            history.push_back(round.crash_point);
            while history.len() > self.config.history_len {
                history.pop_front();
            }
        }

        info!(
            round_id = %round.id,
            crash_point = round.crash_point,
            winners = winners.len(),
            losers = losers.len(),
            "Crash round finalized"
        );

        Ok(RoundSettlement {
            round_id: round.id,
            number: round.number,
            crash_point: round.crash_point,
            reveal: round.seed.reveal(),
            winners,
            losers,
            unrecorded,
        })
    }

    pub fn multiplier_at(&self, elapsed: Duration) -> f64 {
        curve_multiplier(self.config.growth_rate, elapsed)
    }

    /// How long after take-off a round with this crash point ends.
    pub fn crash_delay(&self, crash_point: f64) -> Duration {
        curve_delay(self.config.growth_rate, crash_point)
    }

    /// Live multiplier of a FLYING round, floored to cents and capped at
    /// the crash point.
    pub fn current_multiplier(&self) -> Option<f64> {
        let handle = lock_unpoisoned(&self.current).clone()?;
        let round = lock_unpoisoned(&handle);
        if round.phase != RoundPhase::Flying {
            return None;
        }
        let started = round.fly_started_at?;
        let elapsed = (self.clock.now() - started).to_std().unwrap_or(Duration::ZERO);
        Some(floor_to_cents(self.multiplier_at(elapsed)).min(round.crash_point))
    }

    /// Whether the live round's curve has passed its crash point.
    pub fn should_crash(&self) -> bool {
        let Some(handle) = lock_unpoisoned(&self.current).clone() else {
            return false;
        };
        let round = lock_unpoisoned(&handle);
        match (round.phase, round.fly_started_at) {
            (RoundPhase::Flying, Some(started)) => {
                let elapsed = (self.clock.now() - started).to_std().unwrap_or(Duration::ZERO);
                self.multiplier_at(elapsed) >= round.crash_point
            }
            _ => false,
        }
    }

    /// Most recent crash points, newest first.
    pub fn recent_crash_points(&self) -> Vec<f64> {
        lock_unpoisoned(&self.history).iter().rev().copied().collect()
    }

    /// Refunds from voided rounds that the ledger refused.
    pub fn unsettled_refunds(&self) -> Vec<LedgerEntry> {
        lock_unpoisoned(&self.unsettled_refunds).clone()
    }
}
