use crate::error::{Result, SheetError};
use backon::{ExponentialBuilder, Retryable};
use diagnostics::*;
use std::future::Future;
use std::time::Duration;

/// Backoff used for rate limits and timeouts
#[must_use]
pub fn default_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(30))
        .with_max_times(5)
        .with_jitter()
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the backoff gives up
pub async fn with_backoff<T, F, Fut>(backoff: ExponentialBuilder, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    op.retry(backoff)
        .when(SheetError::is_retryable)
        .notify(|err: &SheetError, delay: Duration| {
            let error_msg = err.to_string();
            let delay_ms = delay.as_millis() as u64;
            warn!("Retrying in {delay_ms}ms after: {error_msg}", delay_ms: delay_ms, error_msg: error_msg);
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_max_times(3)
    }

    #[tokio::test]
    async fn test_retries_rate_limits() {
        let calls = &AtomicUsize::new(0);
        let value = with_backoff(quick(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SheetError::remote(RemoteErrorKind::RateLimited, Some(429), "slow down"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permission_denied_is_not_retried() {
        let calls = &AtomicUsize::new(0);
        let err = with_backoff(quick(), move || async move {
            _ = calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(SheetError::remote(
                RemoteErrorKind::PermissionDenied,
                Some(403),
                "no grant",
            ))
        })
        .await
        .unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::PermissionDenied));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_times() {
        let calls = &AtomicUsize::new(0);
        let result = with_backoff(quick(), move || async move {
            _ = calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(SheetError::remote(RemoteErrorKind::Timeout, None, "deadline"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
