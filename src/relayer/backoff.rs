use std::time::Duration;

/// Delay before retrying after the zero-based `attempt` failed.
///
/// The exponential part `base * 2^attempt` is capped at `cap`; a uniform jitter of up to `jitter`
/// is added on top.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration, jitter: Duration) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt)).min(cap);
    let jitter = jitter.as_millis() as u64;
    let jitter = if jitter == 0 { 0 } else { rand::random_range(0..=jitter) };
    exponential + Duration::from_millis(jitter)
}

/// Applies `multiplier_percent` to a gas estimate and clamps it to `max_gas_limit`.
pub fn bounded_gas_limit(estimate: u64, multiplier_percent: u64, max_gas_limit: u64) -> u64 {
    (estimate.saturating_mul(multiplier_percent) / 100).min(max_gas_limit)
}
