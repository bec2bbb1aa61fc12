//! Simulation context
//!
//! Every component that needs the clock or randomness receives a
//! `SimulationContext` explicitly. Randomness goes through the
//! `RandomSource` trait so runs are reproducible from a seed and tests can
//! pin the draws.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Tick;

/// Source of simulation randomness
pub trait RandomSource {
    /// Uniform draw in `[0, 1)`
    fn uniform(&mut self) -> f64;

    /// Normal draw
    fn normal(&mut self, mean: f64, std_dev: f64) -> f64;

    /// Uniform index in `0..len`, `len` must be positive
    fn index(&mut self, len: usize) -> usize;

    /// Raw 64 bits, used to seed derived generators
    fn next_u64(&mut self) -> u64;

    /// True with probability `p`
    fn chance(&mut self, p: f64) -> bool {
        self.uniform() < p
    }
}

/// Deterministic pseudo-random source seeded once per run
pub struct SeededRng {
    rng: StdRng,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        SeededRng {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRng {
    fn uniform(&mut self) -> f64 {
        self.rng.gen()
    }

    fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        // Box-Muller transform
        let u1: f64 = self.rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let u2: f64 = self.rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.gen()
    }
}

/// Constant draws, for tests that must not depend on chance
#[derive(Clone, Copy, Debug)]
pub struct FixedRng {
    value: f64,
}

impl FixedRng {
    /// `uniform` always returns `value`, `normal` its mean, `index` zero
    /// and `next_u64` `value` scaled to the full range
    pub fn new(value: f64) -> Self {
        FixedRng { value }
    }
}

impl RandomSource for FixedRng {
    fn uniform(&mut self) -> f64 {
        self.value
    }

    fn normal(&mut self, mean: f64, _std_dev: f64) -> f64 {
        mean
    }

    fn index(&mut self, _len: usize) -> usize {
        0
    }

    fn next_u64(&mut self) -> u64 {
        (self.value.clamp(0.0, 1.0) * u64::MAX as f64) as u64
    }
}

/// Clock and randomness shared by everything inside one simulation
pub struct SimulationContext {
    tick: Tick,
    rng: Box<dyn RandomSource>,
}

impl SimulationContext {
    /// Context starting at tick 0 with a seeded source
    pub fn new(seed: u64) -> Self {
        Self::with_rng(Box::new(SeededRng::new(seed)))
    }

    pub fn with_rng(rng: Box<dyn RandomSource>) -> Self {
        SimulationContext {
            tick: Tick::ZERO,
            rng,
        }
    }

    #[inline]
    pub fn now(&self) -> Tick {
        self.tick
    }

    /// Move the clock forward one tick and return the new time
    pub fn advance(&mut self) -> Tick {
        self.tick = self.tick.next();
        self.tick
    }

    pub fn rng(&mut self) -> &mut dyn RandomSource {
        self.rng.as_mut()
    }

    /// Cryptographic generator seeded from the run's randomness, for key
    /// material that must be reproducible under a fixed seed
    pub fn crypto_rng(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.rng.next_u64())
    }

    /// True when periodic work scheduled every `every` ticks runs now
    pub fn is_due(&self, every: u64) -> bool {
        self.tick.is_multiple_of(every)
    }
}

impl std::fmt::Debug for SimulationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationContext")
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}
