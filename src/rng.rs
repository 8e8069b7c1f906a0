//! Random source for tie-breaking, openings and component sampling.
//!
//! `SmallRng` (xoshiro256++) behind a small wrapper. A configured seed makes
//! a whole session replayable; otherwise entropy comes from `getrandom`
//! (the browser crypto API on wasm32).

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub struct EngineRng {
    inner: SmallRng,
}

impl EngineRng {
    pub fn from_entropy() -> Self {
        Self {
            inner: SmallRng::from_os_rng(),
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: SmallRng::seed_from_u64(seed),
        }
    }

    /// Seeded when `seed` is set, entropy otherwise.
    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::from_seed)
    }

    /// Independent child stream; deterministic if `self` is.
    pub fn fork(&mut self) -> Self {
        Self::from_seed(self.inner.random())
    }

    /// Uniform index in `[0, max)`. `max` must be non-zero.
    #[inline(always)]
    pub fn gen_range(&mut self, max: usize) -> usize {
        self.inner.random_range(0..max)
    }

    /// Uniform pick, `None` on an empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        match items.len() {
            0 => None,
            n => items.get(self.gen_range(n)),
        }
    }
}

impl Default for EngineRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}
