//! Entropy sources for index assignment
//!
//! Draws must be unpredictable to the agent being assigned, so production
//! uses the OS generator. Tests use a seeded ChaCha stream so assignments
//! can be replayed.

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Source of 32 bytes the caller cannot bias
pub trait EntropySource: Send + Sync {
    fn entropy(&self) -> [u8; 32];
}

/// Operating-system randomness
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn entropy(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        OsRng.fill_bytes(&mut buf);
        buf
    }
}

/// Deterministic ChaCha20 stream
pub struct SeededEntropy {
    rng: Mutex<ChaCha20Rng>,
}

impl SeededEntropy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }
}

impl EntropySource for SeededEntropy {
    fn entropy(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        self.rng.lock().fill_bytes(&mut buf);
        buf
    }
}
