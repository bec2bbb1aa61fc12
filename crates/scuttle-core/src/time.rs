//! Discrete simulation time
//!
//! The whole system advances in integer ticks. Propagation through the
//! medium is computed in fractional ticks and delivered on the first tick
//! at or after the arrival instant.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A point on the simulation clock
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    #[inline]
    pub fn new(tick: u64) -> Self {
        Tick(tick)
    }

    #[inline]
    pub fn next(self) -> Self {
        Tick(self.0 + 1)
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }

    /// Ticks elapsed since `earlier`, zero if `earlier` is in the future
    #[inline]
    pub fn since(self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// True on every `every`-th tick (tick 0 included)
    #[inline]
    pub fn is_multiple_of(self, every: u64) -> bool {
        every != 0 && self.0 % every == 0
    }
}

impl Add<u64> for Tick {
    type Output = Tick;

    fn add(self, rhs: u64) -> Tick {
        Tick(self.0 + rhs)
    }
}

impl Sub for Tick {
    type Output = u64;

    fn sub(self, rhs: Tick) -> u64 {
        self.since(rhs)
    }
}

impl fmt::Debug for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tick({})", self.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}
