//! Fairness core: commit-reveal seeds and deterministic entropy extraction.
//!
//! Every game derives its outcome exclusively from these primitives, so a
//! third party holding a revealed seed can replay any round or session.

pub mod entropy;
pub mod seed;

pub use entropy::{bounded_ints, derive_entropy, derive_for, Draw, DrawKind, EntropyStream};
pub use seed::{
    generate_client_seed, generate_seed, hash_seed, verify_commitment, RevealedSeed, SeedCommitment,
    SeedPair,
};
