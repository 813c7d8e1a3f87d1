//! Fairplay - provably-fair casino outcome engine
//!
//! Outcomes are derived from a committed server seed, a client seed and a
//! nonce. The server seed's hash is published before play and the seed
//! itself after, so anyone can replay a result with [`fairness`] alone.

pub mod clock;
pub mod config;
pub mod errors;
pub mod fairness;
pub mod games;
pub mod ledger;
pub mod registry;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, EngineConfig};
pub use errors::{ConfigurationError, EngineError, EngineResult, StateConflict, ValidationError};
pub use fairness::{RevealedSeed, SeedCommitment, SeedPair};
pub use games::{CrashEngine, GameKind, OneShotEngine, TileEngine};
pub use ledger::{InMemoryLedger, Ledger, LedgerEntry, LedgerError};
pub use registry::{SessionKey, SessionRegistry};
