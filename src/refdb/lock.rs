//! refdb::lock
//!
//! Bounded-wait distributed lock over a coordination-service mutex.
//!
//! # Invariants
//!
//! - Acquisition either returns a held [`LockHandle`] or fails; never a no-op
//!   handle
//! - A handle is released exactly once: explicitly, or on drop (RAII)
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use refcoord::coord::MemoryCoordinator;
//! use refcoord::refdb::lock::DistributedLock;
//!
//! let client = MemoryCoordinator::new();
//! let lock = DistributedLock::new("/locks/proj1/refs/heads/main", Duration::from_millis(100));
//!
//! let mut handle = lock.acquire(&client).unwrap();
//! assert!(handle.is_held());
//! handle.release().unwrap();
//! assert!(!handle.is_held());
//! ```

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::coord::{ClientError, CoordinationClient, Lease};

/// Errors from distributed locking.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder kept the lock past the wait bound.
    #[error("timed out after {timeout:?} waiting for lock {path}")]
    Timeout { path: String, timeout: Duration },

    /// The coordination service failed while acquiring.
    #[error("failed to acquire lock {path}: {source}")]
    Acquire {
        path: String,
        #[source]
        source: ClientError,
    },

    /// The coordination service failed while releasing.
    #[error("failed to release lock {path}: {source}")]
    Release {
        path: String,
        #[source]
        source: ClientError,
    },
}

/// A named mutex with a wait bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedLock {
    path: String,
    timeout: Duration,
}

impl DistributedLock {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until the lock is held or the timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] if another holder kept the lock
    /// - [`LockError::Acquire`] if the coordination service failed
    pub fn acquire(&self, client: &dyn CoordinationClient) -> Result<LockHandle, LockError> {
        let started = Instant::now();
        match client.acquire_mutex(&self.path, self.timeout) {
            Ok(lease) => {
                debug!(path = %self.path, waited = ?started.elapsed(), "lock acquired");
                Ok(LockHandle {
                    path: self.path.clone(),
                    lease: Some(lease),
                    acquired_at: Instant::now(),
                })
            }
            Err(ClientError::LockTimeout { timeout, .. }) => {
                debug!(path = %self.path, ?timeout, "lock wait timed out");
                Err(LockError::Timeout {
                    path: self.path.clone(),
                    timeout,
                })
            }
            Err(source) => Err(LockError::Acquire {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// A held lock.
///
/// Released when dropped. Call [`LockHandle::release`] to observe release
/// errors.
#[derive(Debug)]
pub struct LockHandle {
    path: String,
    /// `Some` while held.
    lease: Option<Box<dyn Lease>>,
    acquired_at: Instant,
}

impl LockHandle {
    pub fn is_held(&self) -> bool {
        self.lease.is_some()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Time since acquisition.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Release the lock. Idempotent.
    pub fn release(&mut self) -> Result<(), LockError> {
        let Some(mut lease) = self.lease.take() else {
            return Ok(());
        };
        lease.release().map_err(|source| LockError::Release {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path, held = ?self.held_for(), "lock released");
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "lock release on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{FailOn, MemoryCoordinator};

    const PATH: &str = "/locks/proj1/refs/heads/main";

    #[test]
    fn acquire_and_release() {
        let client = MemoryCoordinator::new();
        let lock = DistributedLock::new(PATH, Duration::from_millis(50));

        let mut handle = lock.acquire(&client).unwrap();
        assert!(handle.is_held());
        assert_eq!(handle.path(), PATH);
        assert!(client.is_locked(PATH));

        handle.release().unwrap();
        assert!(!handle.is_held());
        assert!(!client.is_locked(PATH));

        // Second release is a no-op
        handle.release().unwrap();
    }

    #[test]
    fn drop_releases() {
        let client = MemoryCoordinator::new();
        let lock = DistributedLock::new(PATH, Duration::from_millis(50));
        {
            let _handle = lock.acquire(&client).unwrap();
            assert!(client.is_locked(PATH));
        }
        assert!(!client.is_locked(PATH));
    }

    #[test]
    fn contention_times_out() {
        let client = MemoryCoordinator::new();
        let lock = DistributedLock::new(PATH, Duration::from_millis(30));
        let _held = lock.acquire(&client).unwrap();

        let err = lock.acquire(&client).unwrap_err();
        match err {
            LockError::Timeout { path, timeout } => {
                assert_eq!(path, PATH);
                assert_eq!(timeout, Duration::from_millis(30));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn client_failure_is_acquire_error() {
        let client = MemoryCoordinator::new().fail_on(FailOn::AcquireMutex);
        let lock = DistributedLock::new(PATH, Duration::from_millis(30));
        assert!(matches!(
            lock.acquire(&client),
            Err(LockError::Acquire { .. })
        ));
    }
}
