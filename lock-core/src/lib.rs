//! In-process core of the distributed advisory lock service: a fair-queueing coordinator
//! layered on top of a pluggable, non-blocking [`ExternalLockProvider`].
//!
//! Concrete providers (file-system, database, ...) live in their own crates and only ever
//! see this module through the `ExternalLockProvider` trait; this crate has no I/O of its
//! own and is safe to call from blocking threads.

mod cancellation;
mod context;
mod error;
mod handle;
mod manager;
mod proxy;
pub mod provider;

pub use cancellation::Cancellation;
pub use context::ContextId;
pub use error::LockError;
pub use handle::LockHandle;
pub use manager::{LockManager, Wait};
pub use provider::{ExternalLockProvider, LockToken, ProviderError, RequestToken};
