/// Exponential backoff with multiplicative jitter

use rand::Rng;
use std::time::Duration;

/// Computes retry delays as `min(base * 2^attempt, cap) * (1 + jitter * r)`
/// with `r` drawn uniformly from `[0, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            jitter_factor: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            cap,
            jitter_factor,
        }
    }

    /// Delay before jitter is applied. Saturates at `cap`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Jittered delay using the supplied draw (clamped into `[0, 1)`).
    pub fn delay_with_draw(&self, attempt: u32, draw: f64) -> Duration {
        let draw = if draw.is_finite() { draw.clamp(0.0, 1.0) } else { 0.0 };
        let multiplier = 1.0 + self.jitter_factor.max(0.0) * draw;
        self.base_delay(attempt).mul_f64(multiplier)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let draw: f64 = rand::thread_rng().gen();
        self.delay_with_draw(attempt, draw)
    }
}
