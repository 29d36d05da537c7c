//! Exponential growth of the circuit open duration.

use std::time::Duration;

/// Open duration after `reopens` consecutive failed half-open trials.
///
/// `base * multiplier^reopens`, capped at `max`. The first trip uses the base
/// duration (`reopens == 0`).
pub fn open_duration(reopens: u32, base: Duration, multiplier: f64, max: Duration) -> Duration {
    if reopens == 0 {
        return base.min(max);
    }

    let exponent = i32::try_from(reopens).unwrap_or(i32::MAX);
    let scaled = base.as_secs_f64() * multiplier.powi(exponent);

    if !scaled.is_finite() || scaled >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(scaled)
    }
}
