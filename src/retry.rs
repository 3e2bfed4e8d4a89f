use crate::error::{FusionError, FusionResult};
use init4_bin_base::deps::tracing::{debug, warn};
use std::{future::Future, str::FromStr, time::Duration};
use tokio::time::sleep;

/// Which failures the retry wrapper re-attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryMode {
    /// Retry every failure up to the attempt cap, except a funding shortfall.
    #[default]
    All,
    /// Retry only connectivity and rate-limit failures.
    Transient,
}

impl FromStr for RetryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "transient" => Ok(Self::Transient),
            other => Err(format!("unknown retry mode {other:?}, expected \"all\" or \"transient\"")),
        }
    }
}

/// Attempt cap and exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total invocations, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt. Doubles for each later attempt.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Which failures are retried.
    pub mode: RetryMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            mode: RetryMode::All,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn should_retry(&self, err: &FusionError) -> bool {
        if err.kind().is_final() {
            return false;
        }
        match self.mode {
            RetryMode::All => true,
            RetryMode::Transient => err.kind().is_transient(),
        }
    }
}

/// Run `op` under `policy`, retrying with exponential backoff.
///
/// The final failure is wrapped in [`FusionError::Exhausted`], naming
/// `operation` and carrying remediation advice for the failure cause.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> FusionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FusionResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && policy.should_retry(&err) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    kind = %err.kind(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(operation, attempt, "giving up");
                return Err(FusionError::Exhausted {
                    operation,
                    attempts: attempt,
                    suggestions: err.suggestions(),
                    source: Box::new(err),
                });
            }
        }
    }
}
