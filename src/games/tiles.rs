//! Tile-reveal games: sequential reveals over pre-committed traps.
//!
//! One engine drives both board shapes:
//!
//! - [`BoardShape::Grid`]: a single board (mines). Every safe reveal is one
//!   step; a revealed cell cannot be picked again.
//! - [`BoardShape::Tower`]: stacked floors (towers). Each floor has its own
//!   traps and the player climbs one floor per safe reveal.
//!
//! In both cases `floor` in [`TileEngine::reveal_cell`] is the step the
//! player is on, and must equal the session's `current_floor`.
//!
//! Trap positions are drawn from the seed pair when the session starts and
//! never change afterwards. They are only disclosed once the session ends.

use crate::clock::Clock;
use crate::config::TileConfig;
use crate::errors::{EngineError, EngineResult, StateConflict, ValidationError};
use crate::fairness::{bounded_ints, Draw, RevealedSeed, SeedCommitment, SeedPair};
use crate::games::types::{floor_to_places, payout_for, validate_house_edge, validate_wager, GameKind};
use crate::ledger::{credit_and_record, debit_and_record, Ledger, LedgerEntry};
use crate::registry::{lock_unpoisoned, IdleTracked, SessionKey, SessionRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, error, info, warn};

/// Two hex chars per trap draw reach 256 values
const TRAP_CHUNK_WIDTH: usize = 2;
pub const MAX_CELLS_PER_FLOOR: usize = 256;

pub const MINES_GRID_CELLS: usize = 25;
pub const TOWER_FLOORS: usize = 8;

/// How traps are laid out
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BoardShape {
    Grid,
    Tower,
}

/// Towers difficulty: (cells per floor, traps per floor)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TowerDifficulty {
    Easy,
    Medium,
    Hard,
    Expert,
    Master,
}

impl TowerDifficulty {
    pub fn cells_and_traps(self) -> (usize, usize) {
        match self {
            TowerDifficulty::Easy => (4, 1),
            TowerDifficulty::Medium => (3, 1),
            TowerDifficulty::Hard => (2, 1),
            TowerDifficulty::Expert => (3, 2),
            TowerDifficulty::Master => (4, 3),
        }
    }
}

impl std::str::FromStr for TowerDifficulty {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(TowerDifficulty::Easy),
            "medium" => Ok(TowerDifficulty::Medium),
            "hard" => Ok(TowerDifficulty::Hard),
            "expert" => Ok(TowerDifficulty::Expert),
            "master" => Ok(TowerDifficulty::Master),
            other => Err(ValidationError::InvalidParameters(format!(
                "unknown towers difficulty '{}'",
                other
            ))),
        }
    }
}

/// Board geometry and payout ladder of a tile game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutConfig {
    pub shape: BoardShape,
    pub floors: usize,
    pub cells_per_floor: usize,
    pub traps_per_floor: usize,
    /// `multipliers[s]` pays after `s + 1` safe reveals
    pub multipliers: Vec<f64>,
}

impl LayoutConfig {
    /// 5x5 mines board with `mine_count` mines.
    pub fn mines(mine_count: usize, house_edge: f64) -> Result<Self, ValidationError> {
        validate_house_edge(house_edge)?;
        if mine_count == 0 || mine_count >= MINES_GRID_CELLS {
            return Err(ValidationError::InvalidParameters(format!(
                "mine count must be within 1..={}, got {}",
                MINES_GRID_CELLS - 1,
                mine_count
            )));
        }

        let safe = MINES_GRID_CELLS - mine_count;
        let mut survival = 1.0;
        let multipliers = (0..safe)
            .map(|step| {
                survival *= (safe - step) as f64 / (MINES_GRID_CELLS - step) as f64;
                floor_to_places((1.0 - house_edge) / survival, 4)
            })
            .collect();

        Ok(Self {
            shape: BoardShape::Grid,
            floors: 1,
            cells_per_floor: MINES_GRID_CELLS,
            traps_per_floor: mine_count,
            multipliers,
        })
    }

    /// Eight-floor tower at the given difficulty.
    pub fn towers(difficulty: TowerDifficulty, house_edge: f64) -> Result<Self, ValidationError> {
        validate_house_edge(house_edge)?;
        let (cells, traps) = difficulty.cells_and_traps();
        let safe_odds = (cells - traps) as f64 / cells as f64;

        let multipliers = (1..=TOWER_FLOORS)
            .map(|climbed| floor_to_places((1.0 - house_edge) / safe_odds.powi(climbed as i32), 4))
            .collect();

        Ok(Self {
            shape: BoardShape::Tower,
            floors: TOWER_FLOORS,
            cells_per_floor: cells,
            traps_per_floor: traps,
            multipliers,
        })
    }

    pub fn game(&self) -> GameKind {
        match self.shape {
            BoardShape::Grid => GameKind::Mines,
            BoardShape::Tower => GameKind::Towers,
        }
    }

    /// Safe reveals needed to clear the board.
    pub fn max_steps(&self) -> usize {
        match self.shape {
            BoardShape::Grid => self.cells_per_floor - self.traps_per_floor,
            BoardShape::Tower => self.floors,
        }
    }

    /// Trap set consulted at a given step.
    fn trap_row(&self, step: usize) -> usize {
        match self.shape {
            BoardShape::Grid => 0,
            BoardShape::Tower => step,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cells_per_floor < 2 || self.cells_per_floor > MAX_CELLS_PER_FLOOR {
            return Err(ValidationError::InvalidParameters(format!(
                "cells per floor must be within 2..={}, got {}",
                MAX_CELLS_PER_FLOOR, self.cells_per_floor
            )));
        }
        if self.traps_per_floor == 0 || self.traps_per_floor >= self.cells_per_floor {
            return Err(ValidationError::InvalidParameters(format!(
                "traps per floor must be within 1..{}, got {}",
                self.cells_per_floor, self.traps_per_floor
            )));
        }
        match self.shape {
            BoardShape::Grid if self.floors != 1 => {
                return Err(ValidationError::InvalidParameters(
                    "a grid board has exactly one floor".to_string(),
                ))
            }
            BoardShape::Tower if self.floors == 0 => {
                return Err(ValidationError::InvalidParameters(
                    "a tower needs at least one floor".to_string(),
                ))
            }
            _ => {}
        }
        if self.multipliers.len() != self.max_steps() {
            return Err(ValidationError::InvalidParameters(format!(
                "expected {} multipliers, got {}",
                self.max_steps(),
                self.multipliers.len()
            )));
        }
        if let Some(bad) = self.multipliers.iter().find(|m| !m.is_finite() || **m <= 0.0) {
            return Err(ValidationError::InvalidMultiplier(*bad));
        }
        Ok(())
    }
}

/// Trap indices per floor, in draw order.
///
/// Grid boards draw once with no discriminator; towers draw each floor with
/// the floor index as discriminator. Anyone holding the revealed seed can
/// call this to check a finished session.
pub fn derive_trap_layout(seed: &SeedPair, layout: &LayoutConfig) -> Result<Vec<Vec<usize>>, ValidationError> {
    layout.validate()?;
    let draw = Draw::distinct(layout.traps_per_floor, layout.cells_per_floor as u64, TRAP_CHUNK_WIDTH);

    let to_indices = |values: Vec<u64>| values.into_iter().map(|v| v as usize).collect::<Vec<_>>();
    match layout.shape {
        BoardShape::Grid => Ok(vec![to_indices(bounded_ints(seed, None, draw)?)]),
        BoardShape::Tower => (0..layout.floors)
            .map(|floor| bounded_ints(seed, Some(&floor.to_string()), draw).map(to_indices))
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Busted,
    Cashed,
    Abandoned,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Busted => "BUSTED",
            SessionStatus::Cashed => "CASHED",
            SessionStatus::Abandoned => "ABANDONED",
        };
        f.write_str(label)
    }
}

/// One player's tile game in progress
#[derive(Debug)]
pub struct TileSession {
    key: SessionKey,
    bet: f64,
    layout: LayoutConfig,
    seed: SeedPair,
    trap_layout: Vec<Vec<usize>>,
    current_floor: usize,
    revealed: Vec<(usize, usize)>,
    status: SessionStatus,
    payout: Option<f64>,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

impl TileSession {
    fn ensure_active(&self) -> Result<(), StateConflict> {
        if self.status != SessionStatus::Active {
            return Err(StateConflict::SessionNotActive {
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn multiplier_after(&self, steps: usize) -> Option<f64> {
        steps.checked_sub(1).and_then(|i| self.layout.multipliers.get(i).copied())
    }

    fn is_trap(&self, step: usize, index: usize) -> bool {
        self.trap_layout
            .get(self.layout.trap_row(step))
            .map_or(false, |traps| traps.contains(&index))
    }

    fn reference(&self) -> String {
        self.key.to_string()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let finished = self.status != SessionStatus::Active;
        SessionSnapshot {
            key: self.key.clone(),
            game: self.layout.game(),
            status: self.status,
            bet: self.bet,
            current_floor: self.current_floor,
            max_steps: self.layout.max_steps(),
            revealed: self.revealed.clone(),
            current_multiplier: self.multiplier_after(self.current_floor),
            next_multiplier: self.multiplier_after(self.current_floor + 1),
            payout: self.payout,
            commitment: self.seed.commitment(),
            reveal: finished.then(|| self.seed.reveal()),
            trap_layout: finished.then(|| self.trap_layout.clone()),
            created_at: self.created_at,
        }
    }
}

impl IdleTracked for TileSession {
    fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }
}

/// Presentation view of a session; secrets only appear once it has ended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub key: SessionKey,
    pub game: GameKind,
    pub status: SessionStatus,
    pub bet: f64,
    pub current_floor: usize,
    pub max_steps: usize,
    pub revealed: Vec<(usize, usize)>,
    pub current_multiplier: Option<f64>,
    pub next_multiplier: Option<f64>,
    pub payout: Option<f64>,
    pub commitment: SeedCommitment,
    pub reveal: Option<RevealedSeed>,
    pub trap_layout: Option<Vec<Vec<usize>>>,
    pub created_at: DateTime<Utc>,
}

/// Result of a reveal
#[derive(Debug, Clone, PartialEq)]
pub enum RevealOutcome {
    /// Safe cell, session still active
    Safe { multiplier: f64, session: SessionSnapshot },
    /// Trap hit; the wager is lost. `unrecorded` holds the loss entry if the
    /// ledger refused it.
    Busted {
        session: SessionSnapshot,
        unrecorded: Option<LedgerEntry>,
    },
    /// Last safe step revealed; the session was cashed out automatically
    Completed(SessionSnapshot),
}

impl RevealOutcome {
    pub fn session(&self) -> &SessionSnapshot {
        match self {
            RevealOutcome::Safe { session, .. } | RevealOutcome::Busted { session, .. } => session,
            RevealOutcome::Completed(session) => session,
        }
    }
}

/// Tile-reveal engine over the session registry
pub struct TileEngine {
    config: TileConfig,
    registry: SessionRegistry<TileSession>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
}

impl TileEngine {
    pub fn new(config: TileConfig, ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            ledger,
            clock,
        }
    }

    /// Mines layout at the configured house edge.
    pub fn mines_layout(&self, mine_count: usize) -> Result<LayoutConfig, ValidationError> {
        LayoutConfig::mines(mine_count, self.config.house_edge)
    }

    /// Towers layout at the configured house edge.
    pub fn towers_layout(&self, difficulty: TowerDifficulty) -> Result<LayoutConfig, ValidationError> {
        LayoutConfig::towers(difficulty, self.config.house_edge)
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Start a session and take the wager.
    ///
    /// The session is keyed by `(player, game, seed nonce)`; a live session
    /// under the same key is a conflict.
    pub fn start_session(
        &self,
        player_id: &str,
        seed: SeedPair,
        layout: LayoutConfig,
        bet: f64,
    ) -> EngineResult<SessionSnapshot> {
        validate_wager(bet)?;
        let trap_layout = derive_trap_layout(&seed, &layout)?;
        let key = SessionKey::new(player_id, layout.game(), seed.nonce());
        let now = self.clock.now();

        let session = TileSession {
            key: key.clone(),
            bet,
            layout,
            seed,
            trap_layout,
            current_floor: 0,
            revealed: Vec::new(),
            status: SessionStatus::Active,
            payout: None,
            created_at: now,
            last_active: now,
        };

        let snapshot = self.registry.insert_with(key, session, |session| {
            let wager = LedgerEntry::wager(player_id, session.layout.game(), &session.reference(), bet);
            if let Err(e) = debit_and_record(self.ledger.as_ref(), &wager) {
                session.status = SessionStatus::Abandoned;
                return Err(EngineError::from(e));
            }
            Ok(session.snapshot())
        })?;

        info!(
            session = %snapshot.key,
            bet,
            seed_hash = %snapshot.commitment.server_seed_hash,
            "Tile session started"
        );
        Ok(snapshot)
    }

    /// Reveal `index` on step `floor`.
    pub fn reveal_cell(&self, key: &SessionKey, floor: usize, index: usize) -> EngineResult<RevealOutcome> {
        let handle = self
            .registry
            .get(key)
            .ok_or_else(|| StateConflict::SessionNotFound(key.to_string()))?;
        let mut session = lock_unpoisoned(&handle);

        if index >= session.layout.cells_per_floor {
            return Err(ValidationError::IndexOutOfRange {
                index,
                cells: session.layout.cells_per_floor,
            }
            .into());
        }
        if floor >= session.layout.max_steps() {
            return Err(ValidationError::FloorOutOfRange {
                floor,
                floors: session.layout.max_steps(),
            }
            .into());
        }
        session.ensure_active()?;
        if floor != session.current_floor {
            return Err(StateConflict::FloorMismatch {
                expected: session.current_floor,
                actual: floor,
            }
            .into());
        }
        if session.layout.shape == BoardShape::Grid && session.revealed.iter().any(|(_, i)| *i == index) {
            return Err(StateConflict::CellAlreadyRevealed { index }.into());
        }

        if session.is_trap(floor, index) {
            // The wager was taken at start; a bust stands even if the log write fails.
            session.revealed.push((floor, index));
            session.status = SessionStatus::Busted;
            session.payout = Some(0.0);
            session.last_active = self.clock.now();
            self.registry.delete(key);

            let loss = LedgerEntry::loss(&key.player_id, key.game, &session.reference(), session.bet);
            let unrecorded = match self.ledger.record_transaction(&loss) {
                Ok(()) => None,
                Err(e) => {
                    error!(session = %key, "Failed to record tile loss: {}", e);
                    Some(loss)
                }
            };

            info!(session = %key, floor, index, "Tile session busted");
            return Ok(RevealOutcome::Busted {
                session: session.snapshot(),
                unrecorded,
            });
        }

        session.revealed.push((floor, index));
        session.current_floor += 1;
        session.last_active = self.clock.now();

        if session.current_floor == session.layout.max_steps() {
            if let Err(e) = self.settle(key, &mut session) {
                session.revealed.pop();
                session.current_floor -= 1;
                return Err(e);
            }
            return Ok(RevealOutcome::Completed(session.snapshot()));
        }

        let multiplier = session.layout.multipliers[floor];
        debug!(session = %key, floor, index, multiplier, "Safe reveal");
        Ok(RevealOutcome::Safe {
            multiplier,
            session: session.snapshot(),
        })
    }

    /// Take the payout for the floors cleared so far.
    pub fn cash_out(&self, key: &SessionKey) -> EngineResult<SessionSnapshot> {
        let handle = self
            .registry
            .get(key)
            .ok_or_else(|| StateConflict::SessionNotFound(key.to_string()))?;
        let mut session = lock_unpoisoned(&handle);

        session.ensure_active()?;
        if session.current_floor < 1 {
            return Err(StateConflict::NothingToCashOut.into());
        }

        self.settle(key, &mut session)?;
        Ok(session.snapshot())
    }

    /// Credit the payout, then mark the session cashed and drop it.
    fn settle(&self, key: &SessionKey, session: &mut TileSession) -> EngineResult<()> {
        let multiplier = session
            .multiplier_after(session.current_floor)
            .ok_or(StateConflict::NothingToCashOut)?;
        let payout = payout_for(session.bet, multiplier);

        let entry = LedgerEntry::payout(&key.player_id, key.game, &session.reference(), session.bet, payout);
        credit_and_record(self.ledger.as_ref(), &entry)?;

        session.status = SessionStatus::Cashed;
        session.payout = Some(payout);
        session.last_active = self.clock.now();
        self.registry.delete(key);

        info!(session = %key, multiplier, payout, "Tile session cashed out");
        Ok(())
    }

    /// Forfeit an active session; the wager is kept and the seed revealed.
    pub fn abandon(&self, key: &SessionKey) -> EngineResult<SessionSnapshot> {
        self.abandon_if(key, |_| true)?
            .ok_or_else(|| StateConflict::SessionNotFound(key.to_string()).into())
    }

    fn abandon_if(
        &self,
        key: &SessionKey,
        should_abandon: impl FnOnce(&TileSession) -> bool,
    ) -> EngineResult<Option<SessionSnapshot>> {
        let handle = self
            .registry
            .get(key)
            .ok_or_else(|| StateConflict::SessionNotFound(key.to_string()))?;
        let mut session = lock_unpoisoned(&handle);

        session.ensure_active()?;
        if !should_abandon(&session) {
            return Ok(None);
        }

        let loss = LedgerEntry::loss(&key.player_id, key.game, &session.reference(), session.bet);
        self.ledger.record_transaction(&loss)?;

        session.status = SessionStatus::Abandoned;
        session.payout = Some(0.0);
        session.last_active = self.clock.now();
        self.registry.delete(key);

        info!(session = %key, floor = session.current_floor, "Tile session abandoned");
        Ok(Some(session.snapshot()))
    }

    /// Abandon every session idle for longer than the configured timeout.
    pub fn sweep_idle(&self) -> Vec<SessionSnapshot> {
        let cutoff = self.clock.now() - self.config.idle_timeout();
        let mut swept = Vec::new();

        for key in self.registry.idle_keys(cutoff) {
            match self.abandon_if(&key, |s| s.last_active < cutoff) {
                Ok(Some(snapshot)) => swept.push(snapshot),
                Ok(None) => {}
                Err(e) if e.is_conflict() => {}
                Err(e) => warn!(session = %key, "Idle sweep failed to abandon session: {}", e),
            }
        }

        if !swept.is_empty() {
            info!(count = swept.len(), "Swept idle tile sessions");
        }
        swept
    }

    pub fn snapshot(&self, key: &SessionKey) -> EngineResult<SessionSnapshot> {
        Ok(self.registry.with_session(key, |session| session.snapshot())?)
    }

    pub fn sessions_for(&self, player_id: &str) -> Vec<SessionSnapshot> {
        self.registry
            .keys_for_player(player_id)
            .iter()
            .filter_map(|key| self.registry.with_session(key, |s| s.snapshot()).ok())
            .collect()
    }
}
