//! Retry delay computation.

use rand::Rng;
use std::time::Duration;

const MAX_JITTER: f64 = 0.49;

/// Exponential backoff with a cap and downward jitter.
///
/// The ceiling for the n-th consecutive failure is `min(max, base * 2^n)`.
/// Jitter only ever shortens the delay, and by less than half, so delays
/// keep strictly increasing until the cap is reached and never exceed it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, MAX_JITTER),
        }
    }

    /// Backoff without jitter.
    pub fn fixed(base: Duration, max: Duration) -> Self {
        Self::new(base, max, 0.0)
    }

    /// Delay ceiling after `failures` consecutive failures.
    pub fn ceiling(&self, failures: u32) -> Duration {
        let factor = 2u32.pow(failures.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay(&self, failures: u32) -> Duration {
        self.delay_with(failures, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, failures: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(failures);
        if self.jitter == 0.0 {
            return ceiling;
        }
        let cut = rng.gen_range(0.0..self.jitter);
        let jittered = ceiling.mul_f64(1.0 - cut);

        // On the step onto the cap the ceiling grows by less than double, so
        // jitter is confined to the span above the previous ceiling.
        let previous = match failures {
            0 => Duration::ZERO,
            n => self.ceiling(n - 1),
        };
        if previous < ceiling && jittered <= previous {
            return previous + (ceiling - previous).mul_f64(1.0 - cut);
        }
        jittered
    }
}
