//! The `ExternalLockProvider` contract. Concrete providers (file-system, SQL, etc.) live in
//! their own crates; `lock-core` only ever talks to this trait.

use std::error::Error as StdError;
use std::fmt;

/// A disposable token; dropping it releases whatever it represents back to the provider.
pub type LockToken = Box<dyn Send>;

/// A disposable token representing a held "request" (shared/reader) marker.
pub type RequestToken = Box<dyn Send>;

/// The collaborator an external lock provider must satisfy.
///
/// All three operations are non-blocking single tries: the core is responsible for polling
/// and back-off, not the provider.
pub trait ExternalLockProvider: Send + Sync {
    /// Human-readable name, surfaced in `LockError::Timeout`.
    fn name(&self) -> &str;

    /// Attempt to acquire the exclusive lock named `name`. `Ok(None)` means someone else
    /// currently holds it; `Err` means the provider itself failed (network, I/O, ...).
    fn get_lock(&self, name: &str) -> Result<Option<LockToken>, ProviderError>;

    /// Acquire a shared "I would like the exclusive lock" marker for `name`, visible to other
    /// processes via `check_lock_request`. Independent of any exclusive lock this process may
    /// already hold on the same name.
    fn get_lock_request(&self, name: &str) -> Result<Option<RequestToken>, ProviderError>;

    /// Non-blocking probe: does some other party currently hold a request marker for `name`?
    fn check_lock_request(&self, name: &str) -> Result<bool, ProviderError>;
}

/// A persistent provider failure, as opposed to the transient unavailability signalled by
/// `Ok(None)` from `get_lock`/`get_lock_request`.
#[derive(Debug)]
pub struct ProviderError(Box<dyn StdError + Send + Sync>);

impl ProviderError {
    pub fn new(err: impl StdError + Send + Sync + 'static) -> Self {
        ProviderError(Box::new(err))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for ProviderError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.0.as_ref())
    }
}
