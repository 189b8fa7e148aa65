//! Bounded linear backoff for transient gateway failures.
//!
//! Only `GovernorError::GatewayUnavailable` is retried. Estimate failures,
//! policy denials and partial write rejections are returned immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use tollgate_types::config::GatewayConfig;
use tollgate_types::Result;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call (default: 3).
    pub max_retries: u32,
    /// Linear backoff step (default: 200 ms).
    pub base_delay: Duration,
    /// Upper bound for a single delay (default: 2 seconds).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for RetryConfig {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            max_retries: cfg.write_retry_count,
            base_delay: Duration::from_millis(cfg.write_retry_backoff_ms),
            max_delay: Duration::from_millis(cfg.write_retry_backoff_max_ms),
        }
    }
}

/// Delay before retry number `attempt + 1` (0-indexed).
///
/// `min(base_delay * (attempt + 1), max_delay)`.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let raw_ms = base_ms.saturating_mul(u64::from(attempt) + 1);
    Duration::from_millis(raw_ms.min(config.max_delay.as_millis() as u64))
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Returns the last error in the latter two cases.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &'static str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let delay = compute_delay(config, attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
