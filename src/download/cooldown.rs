//! Job-wide pause window opened by `Blocking` responses.
//!
//! All workers of one job share a single [`CooldownGate`]. While the window
//! is open, no worker dequeues a new page or starts a retry.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shared pause window.
#[derive(Debug, Default)]
pub struct CooldownGate {
    open_until: Mutex<Option<Instant>>,
    triggered: AtomicUsize,
}

impl CooldownGate {
    /// Creates a gate with no active window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or extends) the window to at least `window` from now.
    ///
    /// Every call counts as one cooldown, even when it does not extend
    /// an already longer window.
    pub fn trigger(&self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut open_until = self
            .open_until
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if open_until.is_none_or(|current| deadline > current) {
            *open_until = Some(deadline);
        }
        let count = self.triggered.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            window_ms = window.as_millis(),
            cooldowns = count,
            "blocking response; pausing new requests"
        );
    }

    /// Time left in the current window, if one is open.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let open_until = *self
            .open_until
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        open_until
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    /// Waits until the window closes or `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) {
        // Loop because another worker may extend the window while we sleep.
        while let Some(left) = self.remaining() {
            debug!(wait_ms = left.as_millis(), "waiting for cooldown window");
            tokio::select! {
                () = tokio::time::sleep(left) => {}
                () = cancel.cancelled() => return,
            }
        }
    }

    /// Number of times the gate was triggered.
    #[must_use]
    pub fn trigger_count(&self) -> usize {
        self.triggered.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_starts_open() {
        let gate = CooldownGate::new();
        assert!(gate.remaining().is_none());
        gate.wait(&CancellationToken::new()).await;
        assert_eq!(gate.trigger_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_for_window() {
        let gate = CooldownGate::new();
        gate.trigger(Duration::from_secs(10));
        let started = Instant::now();
        gate.wait(&CancellationToken::new()).await;
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(gate.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_never_shortens_window() {
        let gate = CooldownGate::new();
        gate.trigger(Duration::from_secs(30));
        gate.trigger(Duration::from_secs(1));
        assert!(gate.remaining().unwrap() > Duration::from_secs(20));
        assert_eq!(gate.trigger_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_on_cancel() {
        let gate = CooldownGate::new();
        gate.trigger(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        gate.wait(&cancel).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
