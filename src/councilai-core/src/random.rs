//! Injectable randomness for persona selection and intervention planning.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of the random decisions made while building a debate.
pub trait RandomSource: Send {
    /// Returns `true` with the given probability.
    fn chance(&mut self, probability: f64) -> bool;

    /// Returns an index in `0..len`. `len` is never zero.
    fn index(&mut self, len: usize) -> usize;
}

/// Pick one item uniformly, or `None` if there is nothing to pick from.
pub fn pick<T: Copy>(rng: &mut dyn RandomSource, items: &[T]) -> Option<T> {
    if items.is_empty() {
        return None;
    }
    let idx = rng.index(items.len()).min(items.len() - 1);
    Some(items[idx])
}

/// `StdRng`-backed source; reproducible when built from a seed.
pub struct SeededRandom(StdRng);

impl SeededRandom {
    pub fn from_seed(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::from_seed(rand::rng().random())
    }
}

impl RandomSource for SeededRandom {
    fn chance(&mut self, probability: f64) -> bool {
        self.0.random_bool(probability.clamp(0.0, 1.0))
    }

    fn index(&mut self, len: usize) -> usize {
        self.0.random_range(0..len.max(1))
    }
}

/// Deterministic source: every chance resolves to `outcome`, every index to
/// `index` (clamped to the range).
#[cfg(test)]
pub(crate) struct FixedRandom {
    pub outcome: bool,
    pub index: usize,
}

#[cfg(test)]
impl FixedRandom {
    pub fn never() -> Self {
        Self { outcome: false, index: 0 }
    }

    pub fn always() -> Self {
        Self { outcome: true, index: 0 }
    }
}

#[cfg(test)]
impl RandomSource for FixedRandom {
    fn chance(&mut self, _probability: f64) -> bool {
        self.outcome
    }

    fn index(&mut self, len: usize) -> usize {
        self.index.min(len.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_random_is_reproducible() {
        let mut a = SeededRandom::from_seed(7);
        let mut b = SeededRandom::from_seed(7);
        let left: Vec<usize> = (0..20).map(|_| a.index(5)).collect();
        let right: Vec<usize> = (0..20).map(|_| b.index(5)).collect();
        assert_eq!(left, right);
        assert!(left.iter().all(|&i| i < 5));
    }

    #[test]
    fn test_pick_empty_is_none() {
        let mut rng = FixedRandom::never();
        assert_eq!(pick::<u8>(&mut rng, &[]), None);
        assert_eq!(pick(&mut rng, &[3, 4]), Some(3));
    }

    #[test]
    fn test_chance_extremes() {
        let mut rng = SeededRandom::from_seed(1);
        assert!((0..50).all(|_| rng.chance(1.0)));
        assert!((0..50).all(|_| !rng.chance(0.0)));
    }
}
