//! Seeded random source shared by every lowering stage
//!
//! One `RandNum` is created per batch and threaded by `&mut` through
//! expansion, selection, legalization and allocation, so a batch is
//! reproducible from its seed alone.

use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Default bit width for random immediates and CSR values
pub const DEFAULT_WIDTH: u32 = 32;
/// Default lower bound, in bits, for random immediates
pub const DEFAULT_MIN_BITS: u32 = 2;

/// Deterministic random number source
#[derive(Debug, Clone)]
pub struct RandNum {
    seed: u64,
    rng: StdRng,
}

impl RandNum {
    /// Create a source seeded with `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed this source was created with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform integer in `lo..=hi`
    pub fn randint(&mut self, lo: i64, hi: i64) -> Result<i64> {
        if lo > hi {
            return Err(Error::internal(format!(
                "random range is empty: {}..={}",
                lo, hi
            )));
        }
        Ok(self.rng.gen_range(lo..=hi))
    }

    /// Uniform choice from a slice, `None` when it is empty
    pub fn choice<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Random value that needs between `min_bits` and `n` bits to represent,
    /// i.e. uniform in `(1 << min_bits) - 1 ..= (1 << n) - 1`
    pub fn random_n_width_number(&mut self, n: u32, min_bits: u32) -> Result<i64> {
        if n <= 2 || n > 62 {
            return Err(Error::internal(format!(
                "random width must be in 3..=62 bits, got {}",
                n
            )));
        }
        if min_bits < 2 || min_bits >= n {
            return Err(Error::internal(format!(
                "random lower bound must be in 2..{} bits, got {}",
                n, min_bits
            )));
        }
        let lo = (1i64 << min_bits) - 1;
        let hi = (1i64 << n) - 1;
        self.randint(lo, hi)
    }

    /// Random 32-bit-width value with the default lower bound
    pub fn random_word(&mut self) -> i64 {
        let lo = (1i64 << DEFAULT_MIN_BITS) - 1;
        let hi = (1i64 << DEFAULT_WIDTH) - 1;
        self.rng.gen_range(lo..=hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = RandNum::new(7);
        let mut b = RandNum::new(7);
        let xs: Vec<i64> = (0..16).map(|_| a.randint(0, 1000).unwrap()).collect();
        let ys: Vec<i64> = (0..16).map(|_| b.randint(0, 1000).unwrap()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_randint_rejects_empty_range() {
        let mut rng = RandNum::new(5);
        assert_eq!(rng.randint(4, 4).unwrap(), 4);
        assert!(rng.randint(9, 3).is_err());
    }

    #[test]
    fn test_n_width_bounds() {
        let mut rng = RandNum::new(1);
        for _ in 0..200 {
            let v = rng.random_n_width_number(5, 2).unwrap();
            assert!((3..=31).contains(&v));
        }
        assert!(rng.random_n_width_number(2, 2).is_err());
        assert!(rng.random_n_width_number(11, 1).is_err());
    }

    #[test]
    fn test_choice_empty() {
        let mut rng = RandNum::new(3);
        let empty: [u8; 0] = [];
        assert!(rng.choice(&empty).is_none());
        assert_eq!(rng.choice(&[9]), Some(&9));
    }
}
