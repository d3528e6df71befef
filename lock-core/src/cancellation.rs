//! Cancellation signals governing lock *acquisition*, never lock *holding*.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cancellable signal attached to one acquisition attempt.
///
/// Once a `LockHandle` has actually become the primary holder, its `Cancellation` firing
/// later has no effect on the lock it already holds — cancellation only governs whether an
/// acquisition in progress keeps waiting.
#[derive(Clone)]
pub struct Cancellation(Arc<Inner>);

struct Inner {
    fired: AtomicBool,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A signal that never fires on its own.
    pub fn never() -> Self {
        Cancellation(Arc::new(Inner {
            fired: AtomicBool::new(false),
            deadline: None,
        }))
    }

    /// An already-fired signal, giving `timeout == 0` its try-once semantics.
    pub fn already_cancelled() -> Self {
        Cancellation(Arc::new(Inner {
            fired: AtomicBool::new(true),
            deadline: None,
        }))
    }

    /// A signal that fires on its own once `duration` elapses.
    pub fn after(duration: Duration) -> Self {
        Cancellation(Arc::new(Inner {
            fired: AtomicBool::new(false),
            deadline: Some(Instant::now() + duration),
        }))
    }

    /// Fires this signal immediately; any acquisition waiting on it is released as though its
    /// deadline had just elapsed.
    pub fn cancel(&self) {
        self.0.fired.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.0.fired.load(Ordering::Acquire) {
            return true;
        }
        match self.0.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.0.fired.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.0.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_does_not_fire() {
        assert!(!Cancellation::never().is_cancelled());
    }

    #[test]
    fn already_cancelled_fires_immediately() {
        assert!(Cancellation::already_cancelled().is_cancelled());
    }

    #[test]
    fn after_fires_once_elapsed() {
        let c = Cancellation::after(Duration::from_millis(5));
        assert!(!c.is_cancelled());
        std::thread::sleep(Duration::from_millis(20));
        assert!(c.is_cancelled());
    }

    #[test]
    fn manual_cancel_fires_regardless_of_deadline() {
        let c = Cancellation::after(Duration::from_secs(60));
        assert!(!c.is_cancelled());
        c.cancel();
        assert!(c.is_cancelled());
    }
}
