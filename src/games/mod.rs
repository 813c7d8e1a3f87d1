//! Game engines.
//!
//! - [`crash`]: one shared round per cycle, commit-reveal crash point
//! - [`tiles`]: multi-step mines/towers sessions
//! - [`oneshot`]: dice, plinko and slots, settled by a single draw

pub mod crash;
pub mod dice;
pub mod oneshot;
pub mod plinko;
pub mod slots;
pub mod tiles;
pub mod types;

pub use crash::{CrashBet, CrashEngine, RoundPhase, RoundSettlement, RoundSnapshot};
pub use oneshot::{OneShotEngine, OneShotGame, OneShotOutcome, OneShotResult};
pub use tiles::{
    LayoutConfig, RevealOutcome, SessionSnapshot, SessionStatus, TileEngine, TowerDifficulty,
};
pub use types::*;
