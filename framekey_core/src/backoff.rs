//! Retry policy for requests to the signer backend.
//!
//! Delays grow exponentially with a capped base and a randomized jitter
//! multiplier in `[0.5, 1.0]`. A `Retry-After` header from the server
//! overrides the computed delay entirely; backpressure signals beat local
//! heuristics.

/// Retry budget for a request pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub retry_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            retry_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

/// Whether a response status is worth another attempt under the budget.
pub fn should_retry(status: u16, retry_count: u32, cfg: &RetryConfig) -> bool {
    retry_count < cfg.max_retries && cfg.retry_status_codes.contains(&status)
}

/// Deterministic core of the delay computation.
///
/// `retry_after` is the raw `Retry-After` header value; when it parses to a
/// positive whole number of seconds it overrides everything else. Otherwise
/// the capped exponential base is scaled by `jitter`, which callers must keep
/// in `[0.5, 1.0]`.
pub fn delay_for(
    retry_count: u32,
    cfg: &RetryConfig,
    retry_after: Option<&str>,
    jitter: f64,
) -> u64 {
    if let Some(secs) = retry_after.and_then(|v| v.trim().parse::<i64>().ok())
        && secs > 0
    {
        return secs as u64 * 1_000;
    }
    let base = (cfg.initial_delay_ms as f64 * cfg.backoff_factor.powi(retry_count as i32))
        .min(cfg.max_delay_ms as f64);
    (base * jitter.clamp(0.5, 1.0)) as u64
}

/// Computes the next retry delay in milliseconds with sampled jitter.
pub fn next_delay(retry_count: u32, cfg: &RetryConfig, retry_after: Option<&str>) -> u64 {
    let jitter = 0.5 + rand::random::<f64>() * 0.5;
    delay_for(retry_count, cfg, retry_after, jitter)
}
