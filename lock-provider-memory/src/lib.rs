//! A process-local `ExternalLockProvider` used for deterministic tests and the `lockd` CLI's
//! `--provider memory` demo mode. Never use this across process boundaries: the whole point
//! of an external lock provider is that it coordinates across processes, which a
//! `HashMap` obviously cannot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lock_core::{ExternalLockProvider, LockToken, ProviderError, RequestToken};
use parking_lot::Mutex;

struct Slots {
    /// Holder id of whoever currently holds the exclusive slot for a name, if any.
    exclusive: HashMap<String, u64>,
    /// Outstanding request-marker count per name (several readers may each hold one).
    requests: HashMap<String, usize>,
}

pub struct InMemoryLockProvider {
    name: String,
    slots: Arc<Mutex<Slots>>,
    next_holder_id: AtomicU64,
}

impl InMemoryLockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        InMemoryLockProvider {
            name: name.into(),
            slots: Arc::new(Mutex::new(Slots {
                exclusive: HashMap::new(),
                requests: HashMap::new(),
            })),
            next_holder_id: AtomicU64::new(1),
        }
    }
}

impl ExternalLockProvider for InMemoryLockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_lock(&self, name: &str) -> Result<Option<LockToken>, ProviderError> {
        let mut slots = self.slots.lock();
        if slots.exclusive.contains_key(name) {
            return Ok(None);
        }
        let holder_id = self.next_holder_id.fetch_add(1, Ordering::Relaxed);
        slots.exclusive.insert(name.to_string(), holder_id);
        Ok(Some(Box::new(ExclusiveToken {
            name: name.to_string(),
            holder_id,
            slots: Arc::clone(&self.slots),
        })))
    }

    fn get_lock_request(&self, name: &str) -> Result<Option<RequestToken>, ProviderError> {
        let mut slots = self.slots.lock();
        *slots.requests.entry(name.to_string()).or_insert(0) += 1;
        Ok(Some(Box::new(RequestMarkerToken {
            name: name.to_string(),
            slots: Arc::clone(&self.slots),
        })))
    }

    fn check_lock_request(&self, name: &str) -> Result<bool, ProviderError> {
        let slots = self.slots.lock();
        Ok(slots.requests.get(name).copied().unwrap_or(0) > 0)
    }
}

struct ExclusiveToken {
    name: String,
    holder_id: u64,
    slots: Arc<Mutex<Slots>>,
}

impl Drop for ExclusiveToken {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if slots.exclusive.get(&self.name) == Some(&self.holder_id) {
            slots.exclusive.remove(&self.name);
        }
    }
}

struct RequestMarkerToken {
    name: String,
    slots: Arc<Mutex<Slots>>,
}

impl Drop for RequestMarkerToken {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if let Some(count) = slots.requests.get_mut(&self.name) {
            if *count > 0 {
                *count -= 1;
            }
            if *count == 0 {
                slots.requests.remove(&self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_lock_is_mutually_exclusive() {
        let provider = InMemoryLockProvider::new("mem");
        let first = provider.get_lock("widgets").unwrap();
        assert!(first.is_some());
        let second = provider.get_lock("widgets").unwrap();
        assert!(second.is_none());
        drop(first);
        let third = provider.get_lock("widgets").unwrap();
        assert!(third.is_some());
    }

    #[test]
    fn request_markers_are_independently_counted() {
        let provider = InMemoryLockProvider::new("mem");
        assert!(!provider.check_lock_request("widgets").unwrap());
        let marker = provider.get_lock_request("widgets").unwrap();
        assert!(provider.check_lock_request("widgets").unwrap());
        drop(marker);
        assert!(!provider.check_lock_request("widgets").unwrap());
    }
}
