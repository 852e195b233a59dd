//! Fixed-interval retry for connection-level failures.
//!
//! The consumer never gives up on its broker: connect, subscribe and crash
//! recovery all wait the same fixed interval and try again until shutdown
//! is requested.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

/// Constant delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(5000),
        }
    }
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Sleep one interval.
    ///
    /// Returns `false` when shutdown was requested before or during the wait.
    pub async fn wait(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        if is_shutdown(shutdown) {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => !is_shutdown(shutdown),
            _ = wait_for_shutdown(shutdown) => false,
        }
    }
}

/// Resolve once shutdown is requested or the sender is gone.
///
/// The `watch::Ref` from `wait_for` is dropped here so callers never hold
/// the channel's read lock across their own awaits.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

pub fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Run `attempt` until it succeeds, waiting `backoff` between failures.
///
/// Returns `None` if shutdown is requested first.
pub async fn retry_until_shutdown<T, E, F, Fut>(
    operation: &str,
    backoff: &FixedBackoff,
    shutdown: &mut watch::Receiver<bool>,
    mut attempt: F,
) -> Option<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut failures = 0u32;
    loop {
        if is_shutdown(shutdown) {
            return None;
        }
        match attempt().await {
            Ok(value) => return Some(value),
            Err(e) => {
                failures += 1;
                warn!(
                    operation,
                    attempt = failures,
                    error = %e,
                    retry_in_ms = backoff.delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                if !backoff.wait(shutdown).await {
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_retries_until_success() {
        let (_tx, mut rx) = watch::channel(false);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_until_shutdown(
            "connect",
            &FixedBackoff::from_millis(1),
            &mut rx,
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err("broker down")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let (tx, mut rx) = watch::channel(false);
        let backoff = FixedBackoff::from_millis(60_000);

        let waiter = tokio::spawn(async move { backoff.wait(&mut rx).await });
        tx.send(true).unwrap();

        let completed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_no_attempt_after_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let calls = AtomicU32::new(0);

        let result = retry_until_shutdown("subscribe", &FixedBackoff::from_millis(1), &mut rx, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), String>(()) }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wait_elapses_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);

        assert!(FixedBackoff::from_millis(1).wait(&mut rx).await);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_is_send() {
        let (tx, mut rx) = watch::channel(false);

        let waiter = tokio::spawn(async move {
            wait_for_shutdown(&mut rx).await;
            tokio::task::yield_now().await;
            *rx.borrow()
        });
        tx.send(true).unwrap();

        assert!(waiter.await.unwrap());
    }
}
