//! Random bus error injection.
//!
//! Bus simulations draw once per arbitrated frame to decide whether the
//! frame is destroyed by a simulated error. The generator is a seeded
//! `ChaChaRng`, so two runs with the same seed and the same traffic inject
//! errors at the same frames.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;

/// Seed used when a simulation is not given one explicitly.
pub const DEFAULT_SEED: u64 = 0x000F_1E58_A15E;

/// Decides per frame whether a simulated bus error occurs.
#[derive(Debug, Clone)]
pub struct BusErrorInjector {
    probability: f64,
    rng: ChaChaRng,
}

impl BusErrorInjector {
    /// An injector that never fails, seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self::with_probability(0.0, seed)
    }

    /// An injector failing each frame with `probability`.
    pub fn with_probability(probability: f64, seed: u64) -> Self {
        Self {
            probability,
            rng: ChaChaRng::seed_from_u64(seed),
        }
    }

    /// Update the error probability. Returns whether the value changed.
    pub fn set_probability(&mut self, probability: f64) -> bool {
        if self.probability == probability {
            return false;
        }
        self.probability = probability;
        true
    }

    /// The current error probability.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Draw for the next frame. A probability of 1.0 always fails and a
    /// probability of 0.0 never does.
    pub fn should_fail(&mut self) -> bool {
        if self.probability <= 0.0 {
            return false;
        }
        self.rng.r#gen::<f64>() < self.probability
    }
}

impl Default for BusErrorInjector {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}
