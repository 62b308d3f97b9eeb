//! Probabilistic request sampling.

use rand::Rng;

/// Decides whether a request is captured in full.
///
/// Holds no mutable state, so it can be shared between concurrent requests
/// without synchronization.
#[derive(Debug, Clone, Copy)]
pub struct SamplingDecider {
    rate: f64,
}

impl SamplingDecider {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Draw uniformly from `[0, 1)` and sample iff the draw is below the rate.
    pub fn should_sample(&self) -> bool {
        if self.rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < self.rate
    }
}
