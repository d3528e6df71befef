//! Ambient logical-flow identity used for re-entrancy, in place of OS-thread identity.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

static PROCESS_SALT: Lazy<u64> = Lazy::new(rand::random::<u64>);
static COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static CURRENT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// Opaque identifier for a logical execution flow.
///
/// Two `LockHandle`s acquired with the same `ContextId` for the same lock name are
/// re-entrant; handles from different `ContextId`s are always foreign to one another,
/// regardless of which OS thread actually calls `acquire`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u128);

impl ContextId {
    fn fresh() -> Self {
        let lo = COUNTER.fetch_add(1, Ordering::Relaxed);
        ContextId(((*PROCESS_SALT as u128) << 64) | lo as u128)
    }

    /// Returns the ambient id for the calling thread, minting one on first use.
    pub fn current() -> Self {
        CURRENT.with(|cell| match cell.get() {
            Some(id) => id,
            None => {
                let id = Self::fresh();
                cell.set(Some(id));
                id
            }
        })
    }

    /// Installs a fresh id for the calling thread. Used to stop re-entrancy from leaking
    /// across logically unrelated work that happens to reuse the same OS thread (a pooled
    /// worker thread picking up a new, unrelated job).
    pub fn barrier() {
        CURRENT.with(|cell| cell.set(Some(Self::fresh())));
    }

    /// Explicitly carries this id into the calling thread, for callers that hand work to a
    /// different thread as part of the same logical flow (e.g. a thread-pool task that should
    /// still be treated as re-entrant with its submitter).
    pub fn propagate(self) {
        CURRENT.with(|cell| cell.set(Some(self)));
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_stable_within_a_thread() {
        let a = ContextId::current();
        let b = ContextId::current();
        assert_eq!(a, b);
    }

    #[test]
    fn barrier_replaces_the_ambient_id() {
        let before = ContextId::current();
        ContextId::barrier();
        let after = ContextId::current();
        assert_ne!(before, after);
    }

    #[test]
    fn propagate_carries_an_explicit_id() {
        let origin = ContextId::current();
        ContextId::barrier();
        assert_ne!(ContextId::current(), origin);
        origin.propagate();
        assert_eq!(ContextId::current(), origin);
    }

    #[test]
    fn distinct_threads_get_distinct_ids() {
        let here = ContextId::current();
        let there = std::thread::spawn(ContextId::current).join().unwrap();
        assert_ne!(here, there);
    }
}
