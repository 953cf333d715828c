//! Jitter-aware cancellable ticker. Every pacing sleep in the scheduler goes
//! through [`sleep_unless_stopped`], so the cooperative-stop contract (stop
//! is observed between steps, never mid-step) holds by construction instead
//! of by convention.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

/// Periodic interval with randomized variance. Jitter keeps loops across
/// tenants from firing in lockstep.
pub struct Ticker {
    base: Duration,
    jitter_pct: u8,
}

impl Ticker {
    pub fn new(base: Duration, jitter_pct: u8) -> Self {
        Self { base, jitter_pct }
    }

    pub fn from_secs(secs: u64, jitter_pct: u8) -> Self {
        Self::new(Duration::from_secs(secs), jitter_pct)
    }

    /// One interval: `base ± jitter_pct%`.
    pub fn next_interval(&self) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let span = (base_ms * u64::from(self.jitter_pct) / 100).min(base_ms);
        if span == 0 {
            return self.base;
        }
        let ms = rand::thread_rng().gen_range(base_ms - span..=base_ms + span);
        Duration::from_millis(ms)
    }

    /// Sleep one jittered interval. Returns `false` if stopped while waiting.
    pub async fn wait(&self, stop: &mut watch::Receiver<bool>) -> bool {
        sleep_unless_stopped(self.next_interval(), stop).await
    }
}

/// Sleep for `dur` unless the stop flag flips first.
/// Returns `true` when the full duration elapsed, `false` on stop.
/// A dropped stop sender counts as a stop.
pub async fn sleep_unless_stopped(dur: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(dur) => true,
        res = stop.changed() => match res {
            Ok(()) => !*stop.borrow(),
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_jitter_bounds() {
        let ticker = Ticker::new(Duration::from_millis(1000), 15);
        for _ in 0..100 {
            let d = ticker.next_interval().as_millis();
            assert!((850..=1150).contains(&d), "interval {d}ms outside jitter bounds");
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let ticker = Ticker::from_secs(60, 0);
        assert_eq!(ticker.next_interval(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_sleep_completes_without_stop() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(sleep_unless_stopped(Duration::from_millis(10), &mut rx).await);
    }

    #[tokio::test]
    async fn test_sleep_aborts_on_stop() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });
        let started = Instant::now();
        let finished = sleep_unless_stopped(Duration::from_secs(30), &mut rx).await;
        assert!(!finished);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_pre_set_stop_returns_immediately() {
        let (tx, mut rx) = watch::channel(true);
        assert!(!sleep_unless_stopped(Duration::from_secs(30), &mut rx).await);
        drop(tx);
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_stop() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(!sleep_unless_stopped(Duration::from_secs(30), &mut rx).await);
    }
}
