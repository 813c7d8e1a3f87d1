//! Seed material for commit-reveal fairness.
//!
//! A [`SeedPair`] is created before any outcome-affecting action. Only its
//! [`SeedCommitment`] (the SHA-256 of the server seed) is published while a
//! round or session is live; the [`RevealedSeed`] is handed out once it ends.

use crate::errors::ValidationError;
use rand::{distributions::Alphanumeric, Rng};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Server seeds are 32 random bytes, hex-encoded
pub const SERVER_SEED_BYTES: usize = 32;
pub const SERVER_SEED_HEX_LEN: usize = SERVER_SEED_BYTES * 2;

const CLIENT_SEED_LEN: usize = 16;

/// Generate a fresh 256-bit server seed from the OS CSPRNG, hex-encoded.
pub fn generate_seed() -> String {
    let mut bytes = [0u8; SERVER_SEED_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Random alphanumeric client seed for players that did not supply one.
pub fn generate_client_seed() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_SEED_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 of the seed's UTF-8 bytes, lowercase hex.
pub fn hash_seed(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a revealed server seed against the hash published before play.
pub fn verify_commitment(server_seed: &str, published_hash: &str) -> bool {
    hash_seed(server_seed).eq_ignore_ascii_case(published_hash)
}

fn validate_server_seed(server_seed: &str) -> Result<(), ValidationError> {
    if server_seed.len() != SERVER_SEED_HEX_LEN {
        return Err(ValidationError::MalformedSeed(format!(
            "server seed must be {} hex chars, got {}",
            SERVER_SEED_HEX_LEN,
            server_seed.len()
        )));
    }
    if !server_seed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ValidationError::MalformedSeed(
            "server seed must be hex-encoded".to_string(),
        ));
    }
    Ok(())
}

/// Immutable (server seed, client seed, nonce) triple.
///
/// The server seed never leaves this type except through [`SeedPair::reveal`],
/// and `Debug` redacts it so it cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SeedPair {
    server_seed: String,
    server_seed_hash: String,
    client_seed: String,
    nonce: u64,
}

impl SeedPair {
    /// Create a pair with a freshly generated server seed.
    pub fn generate(client_seed: impl Into<String>, nonce: u64) -> Self {
        let server_seed = generate_seed();
        let server_seed_hash = hash_seed(&server_seed);
        Self {
            server_seed,
            server_seed_hash,
            client_seed: client_seed.into(),
            nonce,
        }
    }

    /// Rebuild a pair from previously generated (or revealed) material.
    pub fn from_parts(
        server_seed: impl Into<String>,
        client_seed: impl Into<String>,
        nonce: u64,
    ) -> Result<Self, ValidationError> {
        let server_seed = server_seed.into();
        validate_server_seed(&server_seed)?;
        let server_seed_hash = hash_seed(&server_seed);
        Ok(Self {
            server_seed,
            server_seed_hash,
            client_seed: client_seed.into(),
            nonce,
        })
    }

    pub fn server_seed_hash(&self) -> &str {
        &self.server_seed_hash
    }

    pub fn client_seed(&self) -> &str {
        &self.client_seed
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Crate-internal access for entropy derivation.
    pub(crate) fn server_seed(&self) -> &str {
        &self.server_seed
    }

    /// Publishable view: everything except the server seed.
    pub fn commitment(&self) -> SeedCommitment {
        SeedCommitment {
            server_seed_hash: self.server_seed_hash.clone(),
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
        }
    }

    /// Full disclosure, only once the round/session is over.
    pub fn reveal(&self) -> RevealedSeed {
        RevealedSeed {
            server_seed: self.server_seed.clone(),
            server_seed_hash: self.server_seed_hash.clone(),
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
        }
    }
}

impl fmt::Debug for SeedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedPair")
            .field("server_seed", &"<redacted>")
            .field("server_seed_hash", &self.server_seed_hash)
            .field("client_seed", &self.client_seed)
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// Data published before play
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedCommitment {
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
}

/// Data published after the round/session ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedSeed {
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
}

impl RevealedSeed {
    /// `hash(server_seed) == server_seed_hash`
    pub fn verify(&self) -> bool {
        verify_commitment(&self.server_seed, &self.server_seed_hash)
    }

    /// Turn a disclosed seed back into a pair so outcomes can be replayed.
    pub fn to_seed_pair(&self) -> Result<SeedPair, ValidationError> {
        let pair = SeedPair::from_parts(&self.server_seed, &self.client_seed, self.nonce)?;
        if !self.verify() {
            return Err(ValidationError::MalformedSeed(
                "server seed does not match published hash".to_string(),
            ));
        }
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_seed_shape() {
        let seed = generate_seed();
        assert_eq!(seed.len(), SERVER_SEED_HEX_LEN);
        assert!(seed.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(seed, generate_seed());
    }

    #[test]
    fn test_hash_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            hash_seed("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_commitment_matches_reveal() {
        let pair = SeedPair::generate("client", 7);
        let commitment = pair.commitment();
        let revealed = pair.reveal();

        assert_eq!(commitment.server_seed_hash, revealed.server_seed_hash);
        assert!(revealed.verify());
        assert!(verify_commitment(&revealed.server_seed, &commitment.server_seed_hash));
    }

    #[test]
    fn test_debug_redacts_server_seed() {
        let pair = SeedPair::generate("client", 1);
        let rendered = format!("{:?}", pair);
        assert!(!rendered.contains(pair.server_seed()));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_from_parts_rejects_malformed_seed() {
        assert!(SeedPair::from_parts("short", "c", 0).is_err());
        let not_hex = "z".repeat(SERVER_SEED_HEX_LEN);
        assert!(SeedPair::from_parts(not_hex, "c", 0).is_err());
    }

    #[test]
    fn test_tampered_reveal_fails_verification() {
        let mut revealed = SeedPair::generate("client", 3).reveal();
        revealed.server_seed = generate_seed();
        assert!(!revealed.verify());
        assert!(revealed.to_seed_pair().is_err());
    }
}
