//! Balance collaborator boundary.
//!
//! The engine never owns balances. It calls a synchronous, fallible [`Ledger`]
//! around every wager, payout and refund, and undoes its own tentative state
//! whenever the ledger refuses. Blind retries are never attempted.

use crate::games::types::{round_cents, GameKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};
use tracing::{debug, error};
use uuid::Uuid;

/// Ledger failure surfaced to callers as a dependency failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds for {player_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        player_id: String,
        requested: f64,
        available: f64,
    },

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// What a ledger entry records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Stake taken from the player.
    Wager,
    /// Winning settlement credited to the player.
    Payout,
    /// Losing settlement (bust, crash, forfeit); no balance movement.
    Loss,
    /// Stake returned after a voided round or a failed settlement.
    Refund,
}

/// Transaction record handed to [`Ledger::record_transaction`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub player_id: String,
    pub game: GameKind,
    pub kind: EntryKind,
    /// Round id or session key the entry belongs to
    pub reference: String,
    pub wager: f64,
    pub payout: f64,
    /// `payout - wager` for settlements, zero otherwise
    pub profit: f64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn new(
        player_id: &str,
        game: GameKind,
        kind: EntryKind,
        reference: &str,
        wager: f64,
        payout: f64,
        profit: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            player_id: player_id.to_string(),
            game,
            kind,
            reference: reference.to_string(),
            wager,
            payout,
            profit,
            created_at: Utc::now(),
        }
    }

    pub fn wager(player_id: &str, game: GameKind, reference: &str, amount: f64) -> Self {
        Self::new(player_id, game, EntryKind::Wager, reference, amount, 0.0, 0.0)
    }

    pub fn payout(player_id: &str, game: GameKind, reference: &str, wager: f64, payout: f64) -> Self {
        Self::new(
            player_id,
            game,
            EntryKind::Payout,
            reference,
            wager,
            payout,
            round_cents(payout - wager),
        )
    }

    pub fn loss(player_id: &str, game: GameKind, reference: &str, wager: f64) -> Self {
        Self::new(player_id, game, EntryKind::Loss, reference, wager, 0.0, -wager)
    }

    pub fn refund(player_id: &str, game: GameKind, reference: &str, wager: f64) -> Self {
        Self::new(player_id, game, EntryKind::Refund, reference, wager, 0.0, 0.0)
    }

    /// Balance movement implied by this entry.
    pub fn amount(&self) -> f64 {
        match self.kind {
            EntryKind::Wager | EntryKind::Refund => self.wager,
            EntryKind::Payout => self.payout,
            EntryKind::Loss => 0.0,
        }
    }
}

/// Synchronous balance collaborator
pub trait Ledger: Send + Sync {
    /// Take `amount` from the player, failing with `InsufficientFunds` if short.
    fn debit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError>;

    /// Give `amount` to the player.
    fn credit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError>;

    /// Append to the transaction log.
    fn record_transaction(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;
}

/// Debit a wager and log it; the debit is reversed if logging fails.
pub fn debit_and_record(ledger: &dyn Ledger, entry: &LedgerEntry) -> Result<(), LedgerError> {
    ledger.debit(&entry.player_id, entry.amount())?;
    if let Err(e) = ledger.record_transaction(entry) {
        if let Err(undo) = ledger.credit(&entry.player_id, entry.amount()) {
            error!(player_id = %entry.player_id, entry_id = %entry.id, "Failed to reverse debit: {}", undo);
        }
        return Err(e);
    }
    Ok(())
}

/// Credit a payout/refund and log it; the credit is reversed if logging fails.
pub fn credit_and_record(ledger: &dyn Ledger, entry: &LedgerEntry) -> Result<(), LedgerError> {
    let amount = entry.amount();
    if amount > 0.0 {
        ledger.credit(&entry.player_id, amount)?;
    }
    if let Err(e) = ledger.record_transaction(entry) {
        if amount > 0.0 {
            if let Err(undo) = ledger.debit(&entry.player_id, amount) {
                error!(player_id = %entry.player_id, entry_id = %entry.id, "Failed to reverse credit: {}", undo);
            }
        }
        return Err(e);
    }
    Ok(())
}

/// Per-player lifetime totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub bets: u64,
    pub wagered: f64,
    pub paid_out: f64,
    pub profit: f64,
}

/// Operations an [`InMemoryLedger`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOperation {
    Debit,
    Credit,
    Record,
}

/// Process-local ledger used by the CLI demo and tests.
pub struct InMemoryLedger {
    balances: DashMap<String, f64>,
    stats: DashMap<String, PlayerStats>,
    entries: Mutex<Vec<LedgerEntry>>,
    fail_debits: AtomicBool,
    fail_credits: AtomicBool,
    fail_records: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            stats: DashMap::new(),
            entries: Mutex::new(Vec::new()),
            fail_debits: AtomicBool::new(false),
            fail_credits: AtomicBool::new(false),
            fail_records: AtomicBool::new(false),
        }
    }

    /// Open (or top up) an account.
    pub fn deposit(&self, player_id: &str, amount: f64) {
        let mut balance = self.balances.entry(player_id.to_string()).or_insert(0.0);
        *balance = round_cents(*balance + amount);
    }

    pub fn balance(&self, player_id: &str) -> Option<f64> {
        self.balances.get(player_id).map(|b| *b)
    }

    pub fn stats(&self, player_id: &str) -> PlayerStats {
        self.stats
            .get(player_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn entries_for(&self, player_id: &str) -> Vec<LedgerEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.player_id == player_id)
            .collect()
    }

    /// Simulate an outage of one operation.
    pub fn set_outage(&self, operation: LedgerOperation, failing: bool) {
        let flag = match operation {
            LedgerOperation::Debit => &self.fail_debits,
            LedgerOperation::Credit => &self.fail_credits,
            LedgerOperation::Record => &self.fail_records,
        };
        flag.store(failing, Ordering::SeqCst);
    }

    fn check_outage(&self, flag: &AtomicBool, operation: &str) -> Result<(), LedgerError> {
        if flag.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(format!("{} rejected", operation)));
        }
        Ok(())
    }

    fn apply_stats(&self, entry: &LedgerEntry) {
        let mut stats = self.stats.entry(entry.player_id.clone()).or_default();
        match entry.kind {
            EntryKind::Wager => {
                stats.bets += 1;
                stats.wagered = round_cents(stats.wagered + entry.wager);
            }
            EntryKind::Payout => {
                stats.paid_out = round_cents(stats.paid_out + entry.payout);
                stats.profit = round_cents(stats.profit + entry.profit);
            }
            EntryKind::Loss => {
                stats.profit = round_cents(stats.profit + entry.profit);
            }
            EntryKind::Refund => {
                stats.bets = stats.bets.saturating_sub(1);
                stats.wagered = round_cents(stats.wagered - entry.wager);
            }
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for InMemoryLedger {
    fn debit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError> {
        self.check_outage(&self.fail_debits, "debit")?;
        let mut balance = self
            .balances
            .get_mut(player_id)
            .ok_or_else(|| LedgerError::UnknownAccount(player_id.to_string()))?;
        if *balance + 1e-9 < amount {
            return Err(LedgerError::InsufficientFunds {
                player_id: player_id.to_string(),
                requested: amount,
                available: *balance,
            });
        }
        *balance = round_cents(*balance - amount);
        debug!(player_id, amount, balance = *balance, "Ledger debit");
        Ok(())
    }

    fn credit(&self, player_id: &str, amount: f64) -> Result<(), LedgerError> {
        self.check_outage(&self.fail_credits, "credit")?;
        let mut balance = self
            .balances
            .get_mut(player_id)
            .ok_or_else(|| LedgerError::UnknownAccount(player_id.to_string()))?;
        *balance = round_cents(*balance + amount);
        debug!(player_id, amount, balance = *balance, "Ledger credit");
        Ok(())
    }

    fn record_transaction(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.check_outage(&self.fail_records, "record")?;
        self.apply_stats(entry);
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
