use std::collections::hash_map::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::handle::HandleInner;
use crate::provider::{ExternalLockProvider, LockToken, RequestToken};

/// How often a waiter at the head of the queue re-tries the external provider.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(16);
/// Minimum delay before re-attempting the external lock after a peer's request marker was
/// observed at release time, so a peer that has been politely waiting gets a real shot at it.
pub(crate) const BACKOFF_DELAY: Duration = Duration::from_millis(48);

pub(crate) enum FastPath {
    Granted,
    RejectedTryOnce,
    Enqueued,
}

struct ProxyInner {
    wait_queue: VecDeque<Arc<HandleInner>>,
    current_turn: Option<Arc<HandleInner>>,
    external_lock: Option<LockToken>,
    request_marker: Option<RequestToken>,
    min_next_acquire_at: Option<Instant>,
}

/// One coordinator per (provider, lock name). Owns the in-process FIFO wait queue layered on
/// top of the external lock token; never holds its own monitor while calling into the
/// provider, so a slow or blocked provider call can't stall unrelated names or queue
/// bookkeeping for this one.
pub(crate) struct LockProxy {
    name: String,
    key: String,
    provider: Arc<dyn ExternalLockProvider>,
    inner: Mutex<ProxyInner>,
    dispose_on_close: AtomicBool,
    registry: Weak<Mutex<HashMap<String, Arc<LockProxy>>>>,
}

impl LockProxy {
    pub(crate) fn new(
        name: String,
        key: String,
        provider: Arc<dyn ExternalLockProvider>,
        registry: Weak<Mutex<HashMap<String, Arc<LockProxy>>>>,
    ) -> Arc<Self> {
        Arc::new(LockProxy {
            name,
            key,
            provider,
            inner: Mutex::new(ProxyInner {
                wait_queue: VecDeque::new(),
                current_turn: None,
                external_lock: None,
                request_marker: None,
                min_next_acquire_at: None,
            }),
            dispose_on_close: AtomicBool::new(true),
            registry,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn dispose_on_close(&self) -> bool {
        self.dispose_on_close.load(Ordering::Acquire)
    }

    pub(crate) fn set_dispose_on_close(&self, value: bool) {
        self.dispose_on_close.store(value, Ordering::Release);
    }

    /// Checks whether `candidate` can be granted immediately via re-entrancy against the
    /// current turn, rejects it outright if it is a foreign try-once request against a held
    /// lock, or enqueues it at the tail — all under a single critical section so the decision
    /// is made against a consistent snapshot of `current_turn`.
    pub(crate) fn check_current_turn_or_enqueue(&self, candidate: &Arc<HandleInner>) -> FastPath {
        let mut inner = self.inner.lock();
        if let Some(turn) = inner.current_turn.clone() {
            if turn.owning_context_id() == candidate.owning_context_id() && turn.is_granted() {
                drop(inner);
                return match candidate.grant_secondary_of(&turn) {
                    Ok(()) => FastPath::Granted,
                    Err(()) => {
                        // primary disposed in the gap between the clone above and the grant
                        // attempt; fall back to a normal enqueue as a foreign waiter.
                        let mut inner = self.inner.lock();
                        inner.wait_queue.push_back(Arc::clone(candidate));
                        FastPath::Enqueued
                    }
                };
            }
            if turn.owning_context_id() != candidate.owning_context_id() && candidate.cancellation().is_cancelled() {
                return FastPath::RejectedTryOnce;
            }
        }
        inner.wait_queue.push_back(Arc::clone(candidate));
        FastPath::Enqueued
    }

    /// Runs the full wait-then-acquire cycle for an already-enqueued `candidate`, returning
    /// `true` once it holds the external lock and `false` if cancellation or timeout won.
    pub(crate) fn await_turn_or_timeout(self: &Arc<Self>, candidate: &Arc<HandleInner>) -> bool {
        let is_head = {
            let mut inner = self.inner.lock();
            if inner.current_turn.is_none() {
                self.pop_next(&mut inner);
            }
            matches!(&inner.current_turn, Some(h) if Arc::ptr_eq(h, candidate))
        };
        if !is_head {
            if candidate.cancellation().is_cancelled() {
                candidate.dispose();
                return false;
            }
            if !candidate.await_turn() {
                candidate.dispose();
                return false;
            }
        }
        if self.try_get_lock(candidate) {
            true
        } else {
            candidate.dispose();
            false
        }
    }

    /// Polls the provider until the external lock is obtained or `candidate`'s cancellation
    /// fires. Provider errors are logged and retried rather than propagated: there is no
    /// automatic reconnection, just a fixed polling cadence until cancellation wins.
    ///
    /// A try-once candidate (cancellation already fired on entry, i.e. `timeout == 0`) still
    /// gets exactly one real `get_lock` attempt here — cancellation is only consulted *after*
    /// an attempt, to decide whether to keep polling, never before the first attempt. "Already
    /// cancelled" means "try exactly once", not "never try".
    fn try_get_lock(&self, candidate: &Arc<HandleInner>) -> bool {
        loop {
            let wait = {
                let inner = self.inner.lock();
                inner
                    .min_next_acquire_at
                    .filter(|&t| t > Instant::now())
                    .map(|t| t - Instant::now())
            };
            if let Some(delay) = wait {
                if candidate.cancellation().is_cancelled() {
                    return false;
                }
                thread::sleep(delay.min(POLL_INTERVAL));
                continue;
            }
            match self.provider.get_lock(&self.name) {
                Ok(Some(token)) => {
                    let mut inner = self.inner.lock();
                    inner.request_marker = None;
                    inner.external_lock = Some(token);
                    drop(inner);
                    candidate.grant_primary();
                    debug!(lock = %self.name, context_id = %candidate.owning_context_id(), "acquired external lock");
                    return true;
                }
                Ok(None) => {
                    if candidate.cancellation().is_cancelled() {
                        return false;
                    }
                    self.register_request_marker_if_absent();
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    warn!(lock = %self.name, error = %err, "external lock provider failed, retrying");
                    if candidate.cancellation().is_cancelled() {
                        return false;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    fn register_request_marker_if_absent(&self) {
        let absent = self.inner.lock().request_marker.is_none();
        if !absent {
            return;
        }
        if let Ok(Some(marker)) = self.provider.get_lock_request(&self.name) {
            let mut inner = self.inner.lock();
            if inner.request_marker.is_none() {
                inner.request_marker = Some(marker);
            }
        }
    }

    /// Dequeues the next waiter and signals it as the current turn, or empties out to idle if
    /// the queue is empty. Must be called with `inner` already locked; never calls into the
    /// provider.
    ///
    /// Deliberately does *not* skip a head whose cancellation has already fired: a try-once
    /// candidate (`timeout == 0`) is cancelled from the moment it is created, and is still
    /// owed exactly one real acquisition attempt (see `try_get_lock`). A genuinely timed-out
    /// waiter that reaches the head this way simply gets a courtesy attempt before it fails.
    fn pop_next(&self, inner: &mut ProxyInner) {
        match inner.wait_queue.pop_front() {
            None => {
                inner.current_turn = None;
                inner.external_lock = None;
                inner.request_marker = None;
                inner.min_next_acquire_at = None;
            }
            Some(next) => {
                inner.current_turn = Some(Arc::clone(&next));
                next.signal_turn();
            }
        }
    }

    /// Reacts to `handle` disposing: drops it from the queue, and if it was the current turn,
    /// releases the external lock (applying back-off if a peer's request marker is observed)
    /// and advances to the next waiter.
    pub(crate) fn on_handle_disposed(self: &Arc<Self>, handle: &Arc<HandleInner>) {
        let had_lock;
        {
            let mut inner = self.inner.lock();
            let was_current = matches!(&inner.current_turn, Some(h) if Arc::ptr_eq(h, handle));
            inner.wait_queue.retain(|h| !Arc::ptr_eq(h, handle));
            if !was_current {
                return;
            }
            had_lock = inner.external_lock.is_some();
            inner.current_turn = None;
            if !had_lock {
                self.pop_next(&mut inner);
                self.maybe_idle_cleanup(inner);
                return;
            }
        }
        let should_backoff = self.provider.check_lock_request(&self.name).unwrap_or(false);
        let mut inner = self.inner.lock();
        if should_backoff {
            inner.min_next_acquire_at = Some(Instant::now() + BACKOFF_DELAY);
            trace!(lock = %self.name, "peer request marker observed, backing off before reacquire");
        }
        inner.external_lock = None;
        inner.request_marker = None;
        self.pop_next(&mut inner);
        self.maybe_idle_cleanup(inner);
    }

    fn maybe_idle_cleanup(self: &Arc<Self>, inner: parking_lot::MutexGuard<'_, ProxyInner>) {
        let idle = inner.wait_queue.is_empty() && inner.current_turn.is_none();
        drop(inner);
        if idle && self.dispose_on_close() {
            self.remove_from_registry();
        }
    }

    fn remove_from_registry(self: &Arc<Self>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut map = registry.lock();
        if let Some(existing) = map.get(&self.key) {
            if Arc::ptr_eq(existing, self) {
                map.remove(&self.key);
                trace!(lock = %self.name, "proxy removed from registry, now idle");
            }
        }
    }
}
