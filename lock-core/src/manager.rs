use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::instrument;

use crate::cancellation::Cancellation;
use crate::context::ContextId;
use crate::error::LockError;
use crate::handle::{HandleInner, LockHandle};
use crate::provider::ExternalLockProvider;
use crate::proxy::{FastPath, LockProxy};

/// How long an acquisition is willing to wait, or an explicit cancellation signal in place of
/// a plain timeout.
pub enum Wait {
    TimeoutSeconds(u64),
    Cancellation(Cancellation),
}

impl From<u64> for Wait {
    fn from(seconds: u64) -> Self {
        Wait::TimeoutSeconds(seconds)
    }
}

impl From<Cancellation> for Wait {
    fn from(cancellation: Cancellation) -> Self {
        Wait::Cancellation(cancellation)
    }
}

impl Wait {
    fn into_cancellation(self) -> Cancellation {
        match self {
            Wait::TimeoutSeconds(0) => Cancellation::already_cancelled(),
            Wait::TimeoutSeconds(seconds) => Cancellation::after(Duration::from_secs(seconds)),
            Wait::Cancellation(c) => c,
        }
    }
}

/// Registry of `LockProxy`s for one `ExternalLockProvider`, keyed case-insensitively by lock
/// name. One `LockManager` typically lives for the lifetime of the process.
pub struct LockManager {
    provider: Arc<dyn ExternalLockProvider>,
    proxies: Arc<Mutex<HashMap<String, Arc<LockProxy>>>>,
}

impl LockManager {
    pub fn new(provider: Arc<dyn ExternalLockProvider>) -> Self {
        LockManager {
            provider,
            proxies: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Installs a fresh `ContextId` for the calling thread.
    pub fn barrier(&self) {
        ContextId::barrier();
    }

    pub fn current_context_id(&self) -> ContextId {
        ContextId::current()
    }

    /// Acquires `name`, waiting (subject to `wait`) for it if necessary. Re-entrant within the
    /// same `ContextId`.
    #[instrument(skip(self, owner, wait), fields(lock = %name))]
    pub fn acquire(
        &self,
        owner: impl Into<String>,
        name: &str,
        wait: impl Into<Wait>,
    ) -> Result<LockHandle, LockError> {
        self.acquire_internal(owner.into(), name, wait.into())
    }

    /// Like `acquire`, but never raises a timeout error: a `None` result means the lock was
    /// not immediately available.
    pub fn try_acquire(
        &self,
        owner: impl Into<String>,
        name: &str,
    ) -> Result<Option<LockHandle>, LockError> {
        match self.acquire_internal(owner.into(), name, Cancellation::already_cancelled().into()) {
            Ok(handle) => Ok(Some(handle)),
            Err(LockError::Timeout { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    fn acquire_internal(&self, owner: String, name: &str, wait: Wait) -> Result<LockHandle, LockError> {
        if name.trim().is_empty() {
            return Err(LockError::InvalidUsage("lock name must not be empty".into()));
        }
        let cancellation = wait.into_cancellation();
        let started = Instant::now();
        let proxy = self.proxy_for(name);
        let ctx = ContextId::current();
        let candidate = HandleInner::new(name.to_string(), owner, ctx, cancellation, Arc::clone(&proxy));

        match proxy.check_current_turn_or_enqueue(&candidate) {
            FastPath::Granted => Ok(LockHandle::new(candidate)),
            FastPath::RejectedTryOnce => Err(LockError::timeout(
                self.provider.name(),
                name,
                started.elapsed(),
            )),
            FastPath::Enqueued => {
                if proxy.await_turn_or_timeout(&candidate) {
                    Ok(LockHandle::new(candidate))
                } else {
                    Err(LockError::timeout(self.provider.name(), name, started.elapsed()))
                }
            }
        }
    }

    fn proxy_for(&self, name: &str) -> Arc<LockProxy> {
        let key = name.to_ascii_lowercase();
        let mut map = self.proxies.lock();
        if let Some(existing) = map.get(&key) {
            return Arc::clone(existing);
        }
        let proxy = LockProxy::new(
            name.to_string(),
            key.clone(),
            Arc::clone(&self.provider),
            Arc::downgrade(&self.proxies),
        );
        map.insert(key, Arc::clone(&proxy));
        proxy
    }

    #[cfg(test)]
    pub(crate) fn registered_proxy_count(&self) -> usize {
        self.proxies.lock().len()
    }
}
