//! Candidate-gathering gate
//!
//! A local description is handed to the user only once it is "final": the
//! peer connection reported that candidate gathering completed, or the
//! timeout elapsed. Some networks never report completion, so the timeout
//! bounds the wait. Whichever signal arrives first wins; the other is a
//! no-op.
//!
//! The gate must be armed (its trigger registered with the peer link)
//! before the local description is set, so an early completion is kept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Default bound on the wait for gathering completion.
pub const DEFAULT_GATHERING_TIMEOUT: Duration = Duration::from_millis(2000);

/// Which signal released the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringOutcome {
    /// The peer connection reported end of candidates.
    Complete,
    /// The timeout elapsed first; the description may hold a partial set.
    TimedOut,
}

#[derive(Debug)]
struct TriggerInner {
    fired: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Handle the peer link fires when gathering completes. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GatheringTrigger {
    inner: Arc<TriggerInner>,
}

impl GatheringTrigger {
    /// Signal completion. Returns `true` only for the call that released the
    /// gate; later calls, and calls after the timeout won, return `false`.
    pub fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }
}

/// Single-use gate over "gathering complete" and a timeout.
#[derive(Debug)]
pub struct GatheringGate {
    timeout: Duration,
    rx: oneshot::Receiver<()>,
    trigger: GatheringTrigger,
}

impl GatheringGate {
    pub fn new(timeout: Duration) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            timeout,
            rx,
            trigger: GatheringTrigger {
                inner: Arc::new(TriggerInner {
                    fired: AtomicBool::new(false),
                    tx: Mutex::new(Some(tx)),
                }),
            },
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn trigger(&self) -> GatheringTrigger {
        self.trigger.clone()
    }

    /// Wait for the first signal. Consuming `self` makes the release happen
    /// once per gate.
    pub async fn wait(self) -> GatheringOutcome {
        let GatheringGate {
            timeout,
            rx,
            trigger,
        } = self;

        match tokio::time::timeout(timeout, rx).await {
            Ok(_) => {
                log::debug!("ICE gathering complete");
                GatheringOutcome::Complete
            }
            Err(_) => {
                // Claim the gate so a late completion event becomes a no-op.
                if trigger.inner.fired.swap(true, Ordering::AcqRel) {
                    log::debug!("ICE gathering completed at the timeout boundary");
                    GatheringOutcome::Complete
                } else {
                    log::warn!(
                        "ICE gathering not complete after {:?}, proceeding with gathered candidates",
                        timeout
                    );
                    GatheringOutcome::TimedOut
                }
            }
        }
    }
}

impl Default for GatheringGate {
    fn default() -> Self {
        Self::new(DEFAULT_GATHERING_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_completion() {
        let gate = GatheringGate::default();
        let start = tokio::time::Instant::now();
        assert_eq!(gate.wait().await, GatheringOutcome::TimedOut);
        assert!(start.elapsed() >= DEFAULT_GATHERING_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_before_wait_is_kept() {
        let gate = GatheringGate::default();
        assert!(gate.trigger().fire());
        assert_eq!(gate.wait().await, GatheringOutcome::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_during_wait() {
        let gate = GatheringGate::new(Duration::from_secs(5));
        let trigger = gate.trigger();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.fire();
        });
        let start = tokio::time::Instant::now();
        assert_eq!(gate.wait().await, GatheringOutcome::Complete);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once() {
        let gate = GatheringGate::default();
        let first = gate.trigger();
        let second = gate.trigger();
        assert!(first.fire());
        assert!(!second.fire());
        assert!(!first.fire());
        assert_eq!(gate.wait().await, GatheringOutcome::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_after_timeout_is_noop() {
        let gate = GatheringGate::new(Duration::from_millis(100));
        let trigger = gate.trigger();
        assert_eq!(gate.wait().await, GatheringOutcome::TimedOut);
        assert!(trigger.has_fired());
        assert!(!trigger.fire());
    }
}
