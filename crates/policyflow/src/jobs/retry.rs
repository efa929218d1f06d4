use chrono::Duration;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub jitter_pct: f64,
    /// Backoff never exceeds this many schedule intervals.
    pub max_interval_multiple: i32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            jitter_pct: 0.125,
            max_interval_multiple: 5,
        }
    }
}

/// Whether a job with `consecutive_failures` should still be retried.
pub fn should_retry(max_retries: i32, consecutive_failures: i32) -> bool {
    max_retries < 0 || consecutive_failures <= max_retries
}

/// `retry_period * 2^(failures-1)`, capped at `max_interval_multiple *
/// schedule_interval`, with symmetric jitter.
pub fn next_retry_delay(
    consecutive_failures: i32,
    retry_period: Duration,
    schedule_interval: Duration,
    cfg: &RetryConfig,
    rng: &mut impl Rng,
) -> Duration {
    let failures = consecutive_failures.max(1) as u32;

    // exponent = failures - 1
    let exp = failures.saturating_sub(1);
    let pow2 = 1_i64.checked_shl(exp).unwrap_or(i64::MAX);

    let base_ms = retry_period.num_milliseconds().max(0);
    let mut delay_ms = base_ms.saturating_mul(pow2);

    let cap_ms = schedule_interval
        .num_milliseconds()
        .saturating_mul(cfg.max_interval_multiple as i64);
    if cap_ms > 0 && delay_ms > cap_ms {
        delay_ms = cap_ms;
    }

    let jitter_range = (delay_ms as f64) * cfg.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay_ms as f64 + jitter).round() as i64;
    Duration::milliseconds(jittered.max(0))
}
