//! Hash-chain RNG backing every play.
//!
//! A play's randomness is `SHA256(seed || player_id || sequence)`, re-hashed whenever the
//! 32-byte block is exhausted. Given the same seed material a play is fully reproducible.

use commonware_cryptography::{sha256::Sha256, Hasher};
use rand::RngCore;

pub const SEED_LEN: usize = 32;

pub struct GameRng {
    state: [u8; SEED_LEN],
    index: usize,
}

impl GameRng {
    /// Create a new RNG from seed material, a player and that player's play sequence.
    pub fn new(seed: &[u8; SEED_LEN], player_id: &str, sequence: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(&(player_id.len() as u32).to_be_bytes());
        hasher.update(player_id.as_bytes());
        hasher.update(&sequence.to_be_bytes());
        Self {
            state: hasher.finalize().0,
            index: 0,
        }
    }

    fn next_byte(&mut self) -> u8 {
        if self.index >= SEED_LEN {
            let mut hasher = Sha256::new();
            hasher.update(&self.state);
            self.state = hasher.finalize().0;
            self.index = 0;
        }
        let result = self.state[self.index];
        self.index += 1;
        result
    }
}

impl RngCore for GameRng {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.fill_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.fill_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest.iter_mut() {
            *byte = self.next_byte();
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Where per-play seed material comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedSource {
    /// Fresh OS-backed entropy for every play.
    Entropy,
    /// Fixed material derived from a configured value; plays replay identically.
    Deterministic(u64),
}

impl SeedSource {
    pub fn material(&self) -> [u8; SEED_LEN] {
        match self {
            Self::Entropy => {
                let mut seed = [0u8; SEED_LEN];
                rand::thread_rng().fill_bytes(&mut seed);
                seed
            }
            Self::Deterministic(value) => {
                let mut hasher = Sha256::new();
                hasher.update(b"slotfloor.seed");
                hasher.update(&value.to_be_bytes());
                hasher.finalize().0
            }
        }
    }
}
