#![forbid(unsafe_code)]

use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// Sleeps for a duration but aborts early if the shutdown token fires.
/// Returns `true` if shutdown occurred during the wait.
pub async fn sleep_with_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_false_when_sleep_elapses() {
        let token = CancellationToken::new();
        assert!(!sleep_with_shutdown(Duration::from_secs(5), &token).await);
    }

    #[tokio::test]
    async fn returns_true_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(sleep_with_shutdown(Duration::from_secs(60), &token).await);
    }
}
