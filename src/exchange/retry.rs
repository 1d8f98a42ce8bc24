use std::future::Future;
use std::time::Duration;

use crate::shutdown::Shutdown;

/// Bounded retry with a fixed sleep between attempts.
///
/// One policy shared by every exchange call site, so retry behavior is
/// consistent and testable in one place.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    ///
    /// The inter-attempt sleep is cancellable by shutdown; a triggered
    /// shutdown returns the last error immediately.
    pub async fn run<T, E, F, Fut>(&self, shutdown: &Shutdown, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::debug!("attempt {}/{} failed: {}", attempt, attempts, e);
                    last_err = Some(e);
                }
            }
            if attempt < attempts && !shutdown.sleep(self.interval).await {
                break;
            }
        }
        // attempts >= 1 guarantees at least one stored error
        Err(last_err.unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let (_h, shutdown) = Shutdown::new();
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run(&shutdown, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let (_h, shutdown) = Shutdown::new();
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run(&shutdown, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("not yet".to_string())
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
    async fn test_exhausts_attempts() {
        let (_h, shutdown) = Shutdown::new();
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run(&shutdown, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_retrying() {
        let (handle, shutdown) = Shutdown::new();
        let policy = RetryPolicy::new(100, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        handle.trigger();
        let result: Result<u32, String> = policy
            .run(&shutdown, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            })
            .await;

        assert!(result.is_err());
        // first attempt runs, the cancelled sleep stops the rest
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
