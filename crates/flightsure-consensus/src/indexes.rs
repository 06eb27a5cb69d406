//! # Index Assignment
//!
//! Every oracle holds three distinct responsibility indexes, and every status
//! request is tagged with one. An oracle only answers requests whose index it
//! holds.
//!
//! ```text
//! draw = BLAKE3(entropy || seed identity || nonce)[0..8] mod bound
//! ```
//!
//! The nonce advances once per draw and wraps at the configured ceiling. A
//! draw returns the entropy and nonce it used, so anyone holding an
//! [`IndexDraw`] can recompute the value with [`derive_index`].

use crate::entropy::EntropySource;
use flightsure_core::constants::INDEXES_PER_ORACLE;
use flightsure_core::error::{FlightSureError, Result};
use flightsure_core::types::{Identity, OracleIndex};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One pseudo-random draw with the inputs needed to audit it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDraw {
    pub value: OracleIndex,
    pub nonce: u32,
    pub entropy: [u8; 32],
}

/// Recompute a draw from its inputs
pub fn derive_index(entropy: &[u8; 32], seed: &Identity, nonce: u32, bound: u16) -> OracleIndex {
    let mut hasher = blake3::Hasher::new();
    hasher.update(entropy);
    hasher.update(seed.as_bytes());
    hasher.update(&nonce.to_le_bytes());
    let digest = hasher.finalize();

    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(word) % bound as u64) as OracleIndex
}

/// Index generator shared by oracle registration and request opening
pub struct IndexGenerator {
    entropy: Arc<dyn EntropySource>,

    /// Single writer: the nonce and the entropy it is paired with are read
    /// under the same lock.
    nonce: Mutex<u32>,

    bound: u16,
    nonce_ceiling: u32,
}

impl IndexGenerator {
    /// `bound` must leave room for three distinct `u8` values
    pub fn new(entropy: Arc<dyn EntropySource>, bound: u16, nonce_ceiling: u32) -> Result<Self> {
        if !(INDEXES_PER_ORACLE as u16..=256).contains(&bound) {
            return Err(FlightSureError::OutOfRange {
                what: "index bound",
                value: bound as u64,
            });
        }
        if nonce_ceiling == 0 {
            return Err(FlightSureError::OutOfRange {
                what: "nonce ceiling",
                value: 0,
            });
        }

        Ok(Self {
            entropy,
            nonce: Mutex::new(0),
            bound,
            nonce_ceiling,
        })
    }

    pub fn bound(&self) -> u16 {
        self.bound
    }

    /// Nonce the next draw will use
    pub fn current_nonce(&self) -> u32 {
        *self.nonce.lock()
    }

    /// Draw one index in `[0, bound)`
    pub fn next_pseudo_random(&self, seed: &Identity) -> IndexDraw {
        let mut nonce = self.nonce.lock();
        let used = *nonce;
        *nonce = if used + 1 >= self.nonce_ceiling { 0 } else { used + 1 };

        let entropy = self.entropy.entropy();
        IndexDraw {
            value: derive_index(&entropy, seed, used, self.bound),
            nonce: used,
            entropy,
        }
    }

    /// Draw three pairwise-distinct indexes, retrying on collision
    pub fn generate_indexes(&self, seed: &Identity) -> [OracleIndex; INDEXES_PER_ORACLE] {
        let first = self.next_pseudo_random(seed).value;

        let mut second = self.next_pseudo_random(seed).value;
        while second == first {
            second = self.next_pseudo_random(seed).value;
        }

        let mut third = self.next_pseudo_random(seed).value;
        while third == first || third == second {
            third = self.next_pseudo_random(seed).value;
        }

        [first, second, third]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::SeededEntropy;
    use proptest::prelude::*;

    fn generator(seed: u64, bound: u16, ceiling: u32) -> IndexGenerator {
        IndexGenerator::new(Arc::new(SeededEntropy::new(seed)), bound, ceiling).unwrap()
    }

    #[test]
    fn test_draw_is_reconstructable() {
        let gen = generator(7, 10, 256);
        let seed = Identity::from_label("oracle-1");

        for _ in 0..20 {
            let draw = gen.next_pseudo_random(&seed);
            assert_eq!(draw.value, derive_index(&draw.entropy, &seed, draw.nonce, 10));
            assert!(draw.value < 10);
        }
    }

    #[test]
    fn test_nonce_wraps_at_ceiling() {
        let gen = generator(1, 10, 4);
        let seed = Identity::from_label("requester");

        let nonces: Vec<u32> = (0..6).map(|_| gen.next_pseudo_random(&seed).nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2, 3, 0, 1]);
        assert_eq!(gen.current_nonce(), 2);
    }

    #[test]
    fn test_rejects_bound_without_three_slots() {
        let entropy = Arc::new(SeededEntropy::new(0));
        assert!(IndexGenerator::new(entropy.clone(), 2, 256).is_err());
        assert!(IndexGenerator::new(entropy.clone(), 257, 256).is_err());
        assert!(IndexGenerator::new(entropy.clone(), 3, 0).is_err());
        assert!(IndexGenerator::new(entropy, 3, 1).is_ok());
    }

    #[test]
    fn test_smallest_bound_uses_every_slot() {
        let gen = generator(3, 3, 256);
        let mut indexes = gen.generate_indexes(&Identity::from_label("tight"));
        indexes.sort_unstable();
        assert_eq!(indexes, [0, 1, 2]);
    }

    proptest! {
        #[test]
        fn prop_indexes_distinct_and_bounded(seed in any::<u64>(), label in "[a-z]{1,12}", bound in 3u16..=32) {
            let gen = generator(seed, bound, 256);
            let indexes = gen.generate_indexes(&Identity::from_label(&label));

            prop_assert!(indexes.iter().all(|&i| (i as u16) < bound));
            prop_assert_ne!(indexes[0], indexes[1]);
            prop_assert_ne!(indexes[0], indexes[2]);
            prop_assert_ne!(indexes[1], indexes[2]);
        }
    }
}
