//! Bounded, fixed-delay retry for establishing downstream connections.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::StartupConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl From<&StartupConfig> for RetryPolicy {
    fn from(config: &StartupConfig) -> Self {
        Self::new(
            config.connect_attempts,
            Duration::from_millis(config.retry_delay_ms),
        )
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` attempts have
/// failed, sleeping `policy.delay` between attempts. The last error is
/// returned unchanged.
pub async fn retry_with_policy<F, Fut, T, E>(
    name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(target_service = name, attempt, "Connected after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    target_service = name,
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    target_service = name,
                    attempts = max_attempts,
                    error = %e,
                    "Giving up after exhausting connection attempts"
                );
                return Err(e);
            }
        }
    }
}
