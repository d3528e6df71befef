//! `ExternalLockProvider` backed by OS file locks (`flock`/`LockFileEx` via `fs2`).
//!
//! Each lock name maps to two independent files under `base_dir`: `{name}.lock` holds the
//! exclusive token, `{name}.request.lock` holds request-marker tokens. They have to be
//! separate paths: `flock` exclusive blocks *every* other lock attempt against the same
//! file, shared or exclusive, even a fresh fd opened by the same process that already holds
//! the exclusive lock. A single shared file would mean a held exclusive lock blocks peers
//! from ever placing a request marker at all, and blocks the holder's own
//! `check_lock_request` probe regardless of whether any peer is actually requesting.
//! Splitting the two concerns onto independent inodes keeps them from interfering.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use lock_core::{ExternalLockProvider, LockToken, ProviderError, RequestToken};
use tracing::trace;

pub struct FileLockProvider {
    name: String,
    base_dir: PathBuf,
}

impl FileLockProvider {
    pub fn new(name: impl Into<String>, base_dir: impl AsRef<Path>) -> io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(FileLockProvider {
            name: name.into(),
            base_dir,
        })
    }

    fn exclusive_path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.lock"))
    }

    fn request_path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.request.lock"))
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).read(true).write(true).open(path)
    }
}

impl ExternalLockProvider for FileLockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_lock(&self, name: &str) -> Result<Option<LockToken>, ProviderError> {
        let file = self.open(&self.exclusive_path_for(name)).map_err(ProviderError::new)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                trace!(lock = name, "fs provider: exclusive lock taken");
                Ok(Some(Box::new(ExclusiveFileToken(file))))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(ProviderError::new(e)),
        }
    }

    fn get_lock_request(&self, name: &str) -> Result<Option<RequestToken>, ProviderError> {
        let file = self.open(&self.request_path_for(name)).map_err(ProviderError::new)?;
        match file.try_lock_shared() {
            Ok(()) => Ok(Some(Box::new(SharedFileToken(file)))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(ProviderError::new(e)),
        }
    }

    fn check_lock_request(&self, name: &str) -> Result<bool, ProviderError> {
        // Probe the request file, never the exclusive one: the caller may itself be
        // holding the exclusive lock right now, and that must never count as a request.
        let file = self.open(&self.request_path_for(name)).map_err(ProviderError::new)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                Ok(false)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(ProviderError::new(e)),
        }
    }
}

struct ExclusiveFileToken(File);

impl Drop for ExclusiveFileToken {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

struct SharedFileToken(File);

impl Drop for SharedFileToken {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

