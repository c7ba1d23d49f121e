use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

const BACKOFF_CAP: Duration = Duration::from_secs(30 * 60);

/// Half-jitter exponential backoff.
///
/// `base = min(1s << attempt, 30min)`, result uniform in `[base/2, base)`.
/// The lower bound keeps the delay from ever collapsing to zero.
pub fn next_backoff_with_jitter(attempt: u32) -> Duration {
    let exp = attempt.min(11);
    let base = Duration::from_secs(1u64 << exp).min(BACKOFF_CAP);
    let half = base / 2;
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..half);
    half + jitter
}

/// Sleeps for `duration` unless the token fires first.
///
/// Returns `true` when the full duration elapsed, `false` on cancellation.
pub async fn sleep_with_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return true;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_half_jitter_bounds() {
        for attempt in 0..=20u32 {
            let base = Duration::from_secs(1u64 << attempt.min(11)).min(BACKOFF_CAP);
            for _ in 0..50 {
                let delay = next_backoff_with_jitter(attempt);
                assert!(delay >= base / 2, "attempt {attempt}: {delay:?} below lower bound");
                assert!(delay < base, "attempt {attempt}: {delay:?} above upper bound");
                assert!(!delay.is_zero());
            }
        }
    }

    #[test]
    fn backoff_caps_at_thirty_minutes() {
        let delay = next_backoff_with_jitter(30);
        assert!(delay < BACKOFF_CAP);
        assert!(delay >= BACKOFF_CAP / 2);
    }

    #[tokio::test]
    async fn sleep_returns_false_when_canceled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_with_cancel(&cancel, Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn sleep_completes_when_not_canceled() {
        let cancel = CancellationToken::new();
        assert!(sleep_with_cancel(&cancel, Duration::from_millis(5)).await);
    }
}
