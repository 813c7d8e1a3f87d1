//! Error taxonomy for the outcome engine
//!
//! Every rejected operation maps onto exactly one category so the
//! presentation layer can report a precise condition instead of a generic
//! failure:
//!
//! - [`ValidationError`]: malformed input, nothing was mutated.
//! - [`StateConflict`]: the request is well-formed but illegal in the current
//!   round/session state, nothing was mutated.
//! - [`LedgerError`]: the balance collaborator failed; any tentative change was
//!   rolled back before the error surfaced.

use crate::ledger::LedgerError;

/// Root error type for all engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("State conflict: {0}")]
    Conflict(#[from] StateConflict),

    #[error("Dependency failure: {0}")]
    Dependency(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    pub fn is_dependency(&self) -> bool {
        matches!(self, EngineError::Dependency(_))
    }
}

/// Bad input: amounts, indices, game parameters, seed material
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Amount {amount} outside allowed range [{min}, {max}]")]
    AmountOutOfRange { amount: f64, min: f64, max: f64 },

    #[error("Invalid multiplier: {0}")]
    InvalidMultiplier(f64),

    #[error("Cell index {index} out of range (cells per floor: {cells})")]
    IndexOutOfRange { index: usize, cells: usize },

    #[error("Floor {floor} out of range (floors: {floors})")]
    FloorOutOfRange { floor: usize, floors: usize },

    #[error("Invalid game parameters: {0}")]
    InvalidParameters(String),

    #[error("Malformed seed material: {0}")]
    MalformedSeed(String),
}

/// Well-formed request that is illegal in the current state
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateConflict {
    #[error("Player {player_id} already has a bet in this round")]
    BetAlreadyPlaced { player_id: String },

    #[error("Player {player_id} has no bet in this round")]
    NoBet { player_id: String },

    #[error("Player {player_id} already cashed out")]
    AlreadyCashedOut { player_id: String },

    #[error("Operation requires phase {expected}, round is {actual}")]
    WrongPhase { expected: String, actual: String },

    #[error("A round is already in progress")]
    RoundInProgress,

    #[error("No round is available")]
    NoRound,

    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Session {0} already exists")]
    SessionExists(String),

    #[error("Session is not active (status: {status})")]
    SessionNotActive { status: String },

    #[error("Floor mismatch: expected {expected}, got {actual}")]
    FloorMismatch { expected: usize, actual: usize },

    #[error("Cell {index} already revealed")]
    CellAlreadyRevealed { index: usize },

    #[error("Nothing to cash out: no safe reveal yet")]
    NothingToCashOut,
}

/// Configuration loading and validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

/// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;
