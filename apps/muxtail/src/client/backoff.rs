//! Reconnect delay schedule.
//!
//! The first four attempts use a fixed step table tuned for fast recovery
//! after a mobile app resume; later attempts back off exponentially with
//! additive jitter to avoid thundering-herd reconnects.

use rand::Rng;
use std::time::Duration;

/// Fixed delays for attempts 1 through 4, in milliseconds.
pub const STEP_DELAYS_MS: [u64; 4] = [100, 1000, 3000, 5000];

/// Exponential base for attempts 5 and up.
pub const BASE_DELAY_MS: u64 = 100;

/// Cap on the exponential delay before jitter.
pub const MAX_DELAY_MS: u64 = 10_000;

/// Jitter is uniform in `[0, JITTER_RATIO * delay]`, added on top.
pub const JITTER_RATIO: f64 = 0.3;

/// Delay before reconnect attempt number `attempt` (1-based).
pub fn reconnect_delay(attempt: u32) -> Duration {
    reconnect_delay_with(attempt, &mut rand::thread_rng())
}

pub fn reconnect_delay_with<R: Rng>(attempt: u32, rng: &mut R) -> Duration {
    let attempt = attempt.max(1);
    if let Some(&ms) = STEP_DELAYS_MS.get(attempt as usize - 1) {
        return Duration::from_millis(ms);
    }

    // Attempt 5 lands at 100 * 2^4 = 1600ms, doubling until the cap.
    let exponent = (attempt - 1).min(16);
    let exponential = BASE_DELAY_MS.saturating_mul(1u64 << exponent);
    let capped = exponential.min(MAX_DELAY_MS);
    let jitter = (rng.r#gen::<f64>() * JITTER_RATIO * capped as f64) as u64;
    Duration::from_millis(capped + jitter)
}
