//! Exponential backoff with jitter for external calls (§4.6, §5).

use crate::config::RetrySettings;
use crate::error::{ErrorKind, HoptixError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A single cancellation flag shared across an entire run, threaded through
/// every call made on the orchestrator's behalf.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Retry `op` under the configured exponential-backoff-with-jitter policy.
///
/// Stops immediately (without consuming a retry) if `token` is cancelled, and
/// only retries errors classified [`ErrorKind::TransientExternal`].
pub async fn with_retry<T, F, Fut>(settings: &RetrySettings, token: &CancellationToken, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        if token.is_cancelled() {
            return Err(HoptixError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind() == ErrorKind::TransientExternal && attempt < settings.max_retries => {
                let delay = backoff_delay(settings, attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transient error: {err}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(attempt, "giving up: {err}");
                return Err(err);
            }
        }
    }
}

fn backoff_delay(settings: &RetrySettings, attempt: u32) -> Duration {
    let base = settings.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
    let capped = base.min(settings.max_delay_ms);
    let jitter = jitter_fraction(attempt);
    Duration::from_millis((capped as f64 * (0.5 + jitter * 0.5)) as u64)
}

/// Deterministic pseudo-jitter in `[0, 1)`, avoiding a dependency on `rand`
/// for a quantity that only needs to spread retries, not be unpredictable.
fn jitter_fraction(attempt: u32) -> f64 {
    let x = (attempt as u64).wrapping_mul(2654435761).wrapping_add(0x9E3779B9);
    ((x % 1000) as f64) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn succeeds_without_retry() {
        let settings = RetrySettings::default();
        let token = CancellationToken::new();
        let result: Result<u32> = with_retry(&settings, &token, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let mut settings = RetrySettings::default();
        settings.base_delay_ms = 1;
        settings.max_delay_ms = 2;
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<u32> = with_retry(&settings, &token, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(HoptixError::TransientExternal("flaky".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let settings = RetrySettings::default();
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<u32> = with_retry(&settings, &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HoptixError::PermanentExternal("nope".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let settings = RetrySettings::default();
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<u32> = with_retry(&settings, &token, || async { Ok(1) }).await;
        assert!(matches!(result, Err(HoptixError::Cancelled)));
    }
}
