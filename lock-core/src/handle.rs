use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::cancellation::Cancellation;
use crate::context::ContextId;
use crate::proxy::LockProxy;

struct HandleState {
    /// Set by the Proxy once this handle reaches the head of the wait queue.
    my_turn: bool,
    granted: bool,
    disposed: bool,
    /// `Some(self)` for a primary holder, `Some(other)` for a secondary (re-entrant) grant,
    /// `None` before any grant has happened.
    actual_holder: Option<Arc<HandleInner>>,
}

/// Internal, `Arc`-shared half of a lock acquisition. The `LockProxy` tracks these directly
/// (in its wait queue and as `current_turn`); the caller-facing `LockHandle` wraps exactly one
/// of them and is what actually owns dispose-on-drop semantics.
pub(crate) struct HandleInner {
    name: String,
    owner: String,
    owning_context: ContextId,
    cancellation: Cancellation,
    state: Mutex<HandleState>,
    condvar: Condvar,
    proxy: Arc<LockProxy>,
}

impl HandleInner {
    pub(crate) fn new(
        name: String,
        owner: String,
        owning_context: ContextId,
        cancellation: Cancellation,
        proxy: Arc<LockProxy>,
    ) -> Arc<Self> {
        Arc::new(HandleInner {
            name,
            owner,
            owning_context,
            cancellation,
            state: Mutex::new(HandleState {
                my_turn: false,
                granted: false,
                disposed: false,
                actual_holder: None,
            }),
            condvar: Condvar::new(),
            proxy,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn owning_context_id(&self) -> ContextId {
        self.owning_context
    }

    pub(crate) fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub(crate) fn is_granted(&self) -> bool {
        let st = self.state.lock();
        st.granted && !st.disposed
    }

    pub(crate) fn is_secondary(self: &Arc<Self>) -> bool {
        let st = self.state.lock();
        matches!(&st.actual_holder, Some(holder) if !Arc::ptr_eq(holder, self))
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Grants this handle as the primary holder of the external lock.
    pub(crate) fn grant_primary(self: &Arc<Self>) {
        let mut st = self.state.lock();
        st.actual_holder = Some(Arc::clone(self));
        st.granted = true;
    }

    /// Grants this handle as a re-entrant secondary of `primary`. Fails if `primary` has
    /// already observably disposed, so a racing `Dispose` never produces a zombie secondary.
    pub(crate) fn grant_secondary_of(self: &Arc<Self>, primary: &Arc<HandleInner>) -> Result<(), ()> {
        if primary.state.lock().disposed {
            return Err(());
        }
        if primary.owning_context != self.owning_context || !primary.name.eq_ignore_ascii_case(&self.name) {
            return Err(());
        }
        let mut st = self.state.lock();
        st.actual_holder = Some(Arc::clone(primary));
        st.granted = true;
        Ok(())
    }

    /// Marks this handle as the proxy's current turn and wakes whatever thread called
    /// `await_turn` on it.
    pub(crate) fn signal_turn(&self) {
        let mut st = self.state.lock();
        st.my_turn = true;
        drop(st);
        self.condvar.notify_all();
    }

    /// Blocks until this handle becomes the current turn, its cancellation fires, or it is
    /// disposed out from under the wait. Returns `true` only in the first case.
    pub(crate) fn await_turn(&self) -> bool {
        let mut st = self.state.lock();
        loop {
            if st.disposed {
                return false;
            }
            if st.my_turn {
                return true;
            }
            match self.cancellation.deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.condvar.wait_for(&mut st, deadline - now);
                }
                None => {
                    self.condvar.wait(&mut st);
                }
            }
        }
    }

    /// Idempotent disposal: releases whatever this handle holds and notifies the proxy so it
    /// can advance the wait queue or release the external lock.
    pub(crate) fn dispose(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            if st.disposed {
                return;
            }
            st.disposed = true;
            st.granted = false;
        }
        self.condvar.notify_all();
        trace!(lock = %self.name, context_id = %self.owning_context, "handle disposed");
        self.proxy.on_handle_disposed(self);
    }
}

/// Caller-facing handle returned by `LockManager::acquire`/`try_acquire`.
///
/// Not `Clone`: exactly one `LockHandle` exists per successful acquisition, and dropping it
/// disposes the underlying grant exactly once.
pub struct LockHandle {
    pub(crate) inner: Arc<HandleInner>,
}

impl LockHandle {
    pub(crate) fn new(inner: Arc<HandleInner>) -> Self {
        LockHandle { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn owner(&self) -> &str {
        self.inner.owner()
    }

    pub fn owning_context_id(&self) -> ContextId {
        self.inner.owning_context_id()
    }

    pub fn is_granted(&self) -> bool {
        self.inner.is_granted()
    }

    pub fn is_secondary(&self) -> bool {
        self.inner.is_secondary()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Whether the underlying Proxy is removed from the Manager's registry once it goes idle
    /// after this handle (and every other waiter) disposes.
    pub fn dispose_proxy_on_close(&self) -> bool {
        self.inner.proxy.dispose_on_close()
    }

    pub fn set_dispose_proxy_on_close(&self, value: bool) {
        self.inner.proxy.set_dispose_on_close(value);
    }

    /// Releases the lock. Safe to call more than once; only the first call has an effect.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("name", &self.name())
            .field("owner", &self.owner())
            .field("granted", &self.is_granted())
            .field("secondary", &self.is_secondary())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
