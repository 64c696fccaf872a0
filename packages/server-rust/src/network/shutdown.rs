//! Graceful shutdown controller.
//!
//! Health state lives in an `ArcSwap` for lock-free reads from the health
//! handlers; draining waits on the active count of the shared
//! [`ConnectionCounter`].

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use super::counter::ConnectionCounter;

/// Server health state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Backends are being registered; calls are not accepted yet.
    Starting,
    Ready,
    /// No new connections; active calls are finishing.
    Draining,
    /// Every active call finished before the drain deadline.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates shutdown across the server:
/// 1. Health checks read `health_state()`
/// 2. `trigger_shutdown()` moves to Draining and signals all listeners
/// 3. `wait_for_drain()` blocks until the active call count reaches zero
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    counter: Arc<ConnectionCounter>,
    health_state: Arc<ArcSwap<HealthState>>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state that drains on `counter`.
    #[must_use]
    pub fn new(counter: Arc<ConnectionCounter>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            counter,
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Returns a receiver that flips to `true` when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Transitions to `Draining` and signals all shutdown receivers.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        // Ignore send errors -- receivers may have been dropped
        let _ = self.shutdown_signal.send(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    #[must_use]
    pub fn counter(&self) -> &Arc<ConnectionCounter> {
        &self.counter
    }

    /// Waits for all active calls to complete, up to `timeout`.
    ///
    /// Returns `true` (and moves to `Stopped`) when the count reached zero,
    /// `false` if the deadline passed first (state stays `Draining`).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        self.wait_for_drain_until(tokio::time::Instant::now() + timeout)
            .await
    }

    /// Like [`wait_for_drain`](Self::wait_for_drain), against a fixed deadline
    /// shared with the rest of the shutdown sequence.
    pub async fn wait_for_drain_until(&self, deadline: tokio::time::Instant) -> bool {
        loop {
            if self.counter.active() == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            // Poll at 10ms intervals to avoid busy-waiting
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ShutdownController {
        ShutdownController::new(Arc::new(ConnectionCounter::new()))
    }

    #[test]
    fn health_state_transitions_starting_ready_draining() {
        let controller = controller();
        assert_eq!(controller.health_state(), HealthState::Starting);

        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);

        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
        assert_eq!(controller.health_state().as_str(), "draining");
    }

    #[tokio::test]
    async fn shutdown_receiver_notified() {
        let controller = controller();
        let mut rx = controller.shutdown_receiver();
        assert!(!*rx.borrow());

        controller.trigger_shutdown();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn wait_for_drain_immediate_success() {
        let controller = controller();
        controller.set_ready();
        controller.trigger_shutdown();

        assert!(controller.wait_for_drain(Duration::from_secs(1)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn wait_for_drain_with_active_calls() {
        let controller = controller();
        controller.set_ready();

        let guard = controller.counter().guard();
        controller.trigger_shutdown();

        let guard_handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);

        guard_handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_timeout() {
        let controller = controller();
        controller.set_ready();

        let _guard = controller.counter().guard();
        controller.trigger_shutdown();

        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
    }
}
