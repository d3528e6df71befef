use std::time::Duration;

use crate::provider::ProviderError;

/// Errors surfaced across the public API.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{message}")]
    Timeout {
        provider_name: String,
        lock_name: String,
        waited: Duration,
        message: String,
    },

    #[error("invalid lock usage: {0}")]
    InvalidUsage(String),

    #[error("external lock provider failed: {0}")]
    Provider(#[from] ProviderError),
}

impl LockError {
    pub(crate) fn timeout(provider_name: &str, lock_name: &str, waited: Duration) -> Self {
        let message = format!(
            "timed out acquiring lock '{lock_name}' from provider '{provider_name}' after {waited:?}"
        );
        LockError::Timeout {
            provider_name: provider_name.to_string(),
            lock_name: lock_name.to_string(),
            waited,
            message,
        }
    }
}
