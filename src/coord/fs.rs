//! coord::fs
//!
//! Coordination service backed by a shared directory.
//!
//! # Storage
//!
//! Under `<dir>/<root_node>`:
//! - `<node>/` - one directory per node, nested like the path
//! - `<node>/.data` - payload; a node without it has no payload
//! - `<node>/.lease` - mutex lease file, locked while held
//! - `.store.lock` - store-wide lock serializing mutations
//!
//! # Invariants
//!
//! - Mutations hold the store lock exclusively, reads hold it shared
//! - Payloads are replaced atomically (write `.data.tmp`, then rename)
//! - A lease is an exclusive OS lock on `.lease`, so it dies with its process
//!
//! Callers wait for the store lock, up to the connection timeout. Only a wait
//! that runs out surfaces as [`ClientError::Busy`]; it is retried with the
//! configured backoff (the CAS policy for compare-and-set, the general policy
//! for everything else) and reported as an error once the policy is
//! exhausted. Contention never turns into a failed compare-and-set.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CasOutcome, ClientError, CoordinationClient, CoordinatorSettings, Lease, StoredValue};
use crate::core::paths::PathScheme;
use crate::core::retry::RetryPolicy;

const DATA_FILE: &str = ".data";
const DATA_TMP_FILE: &str = ".data.tmp";
const LEASE_FILE: &str = ".lease";
const STORE_LOCK_FILE: &str = ".store.lock";

/// How often a waiting mutex acquisition re-checks the lease.
const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How often a waiting call re-checks the store lock.
const STORE_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Holder information written into a lease file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Session id of the holding client.
    pub session: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    /// Acquisition time plus the session timeout.
    pub expires_at: DateTime<Utc>,
}

/// Directory-backed coordination service.
#[derive(Debug)]
pub struct FsCoordinator {
    base: PathBuf,
    session: String,
    session_timeout: Duration,
    connection_timeout: Duration,
    retry: RetryPolicy,
    cas_retry: RetryPolicy,
    closed: AtomicBool,
}

impl FsCoordinator {
    /// Open (creating if needed) the service rooted at `dir`.
    ///
    /// Setup failures are retried with the general policy until the
    /// connection timeout elapses.
    pub fn open(dir: &Path, settings: &CoordinatorSettings) -> Result<Self, ClientError> {
        let mut base = dir.to_path_buf();
        for segment in PathScheme::segments(&settings.root_node) {
            base.push(segment);
        }

        let started = Instant::now();
        settings
            .retry
            .run(
                "open coordination directory",
                || fs::create_dir_all(&base),
                |e| {
                    e.kind() != ErrorKind::PermissionDenied
                        && started.elapsed() < settings.connection_timeout
                },
            )
            .map_err(|e| ClientError::Unavailable {
                message: format!("cannot open {}: {}", base.display(), e),
            })?;

        let session = uuid::Uuid::new_v4().to_string();
        debug!(base = %base.display(), %session, "opened fs coordinator");

        Ok(Self {
            base,
            session,
            session_timeout: settings.session_timeout,
            connection_timeout: settings.connection_timeout,
            retry: settings.retry,
            cas_retry: settings.cas_retry,
            closed: AtomicBool::new(false),
        })
    }

    /// Directory holding the root namespace.
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Session id stamped on leases taken by this client.
    pub fn session_id(&self) -> &str {
        &self.session
    }

    /// Current holder of the mutex at `path`, if any.
    pub fn lease_holder(&self, path: &str) -> Result<Option<LeaseRecord>, ClientError> {
        self.ensure_open()?;
        let lease_path = self.node_dir(path)?.join(LEASE_FILE);
        let mut raw = String::new();
        match File::open(&lease_path) {
            Ok(mut file) => file
                .read_to_string(&mut raw)
                .map_err(|e| ClientError::io(path, e))?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ClientError::io(path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path, error = %e, "unreadable lease record");
                Ok(None)
            }
        }
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    fn node_dir(&self, path: &str) -> Result<PathBuf, ClientError> {
        let mut dir = self.base.clone();
        for segment in PathScheme::segments(path) {
            if segment.starts_with('.') {
                return Err(ClientError::InvalidPath {
                    path: path.to_string(),
                    reason: format!("segment '{segment}' is reserved"),
                });
            }
            dir.push(segment);
        }
        Ok(dir)
    }

    /// Run `f` under the store lock, retrying timed-out waits with `policy`.
    fn with_store_lock<T>(
        &self,
        path: &str,
        exclusive: bool,
        policy: &RetryPolicy,
        f: impl FnOnce() -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        self.ensure_open()?;
        let lock_path = self.base.join(STORE_LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ClientError::io(path, e))?;

        policy.run(
            "store lock",
            || self.wait_for_store_lock(&file, path, exclusive),
            ClientError::is_transient,
        )?;

        let result = f();
        if let Err(e) = FileExt::unlock(&file) {
            warn!(path, error = %e, "failed to unlock store");
        }
        result
    }

    /// Poll the store lock until it is taken or the connection timeout
    /// elapses.
    fn wait_for_store_lock(
        &self,
        file: &File,
        path: &str,
        exclusive: bool,
    ) -> Result<(), ClientError> {
        let deadline = Instant::now() + self.connection_timeout;
        loop {
            let attempt = if exclusive {
                FileExt::try_lock_exclusive(file)
            } else {
                FileExt::try_lock_shared(file)
            };
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ClientError::Busy {
                            path: path.to_string(),
                        });
                    }
                    std::thread::sleep(STORE_LOCK_POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => return Err(ClientError::io(path, e)),
            }
        }
    }

    fn read_node(&self, dir: &Path, path: &str) -> Result<StoredValue, ClientError> {
        if !dir.is_dir() {
            return Ok(StoredValue::Absent);
        }
        match fs::read(dir.join(DATA_FILE)) {
            Ok(bytes) => Ok(StoredValue::Present(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoredValue::Tombstone),
            Err(e) => Err(ClientError::io(path, e)),
        }
    }

    fn write_node(&self, dir: &Path, path: &str, data: &[u8]) -> Result<(), ClientError> {
        let tmp = dir.join(DATA_TMP_FILE);
        let mut file = File::create(&tmp).map_err(|e| ClientError::io(path, e))?;
        file.write_all(data).map_err(|e| ClientError::io(path, e))?;
        file.sync_all().map_err(|e| ClientError::io(path, e))?;
        fs::rename(&tmp, dir.join(DATA_FILE)).map_err(|e| ClientError::io(path, e))
    }
}

fn has_child_nodes(dir: &Path, path: &str) -> Result<bool, ClientError> {
    let entries = fs::read_dir(dir).map_err(|e| ClientError::io(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ClientError::io(path, e))?;
        let is_dir = entry
            .file_type()
            .map_err(|e| ClientError::io(path, e))?
            .is_dir();
        if is_dir && !entry.file_name().to_string_lossy().starts_with('.') {
            return Ok(true);
        }
    }
    Ok(false)
}

impl CoordinationClient for FsCoordinator {
    fn backend(&self) -> &'static str {
        "fs"
    }

    fn check_exists(&self, path: &str) -> Result<bool, ClientError> {
        let dir = self.node_dir(path)?;
        self.with_store_lock(path, false, &self.retry, || Ok(dir.is_dir()))
    }

    fn get_data(&self, path: &str) -> Result<StoredValue, ClientError> {
        let dir = self.node_dir(path)?;
        self.with_store_lock(path, false, &self.retry, || self.read_node(&dir, path))
    }

    fn delete(&self, path: &str, recursive: bool) -> Result<(), ClientError> {
        let dir = self.node_dir(path)?;
        if dir == self.base {
            return Err(ClientError::InvalidPath {
                path: path.to_string(),
                reason: "cannot delete the root namespace".into(),
            });
        }
        self.with_store_lock(path, true, &self.retry, || {
            if !dir.is_dir() {
                return Ok(());
            }
            if !recursive && has_child_nodes(&dir, path)? {
                return Err(ClientError::NotEmpty {
                    path: path.to_string(),
                });
            }
            match fs::remove_dir_all(&dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(ClientError::io(path, e)),
            }
        })
    }

    fn compare_and_set(
        &self,
        path: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<CasOutcome, ClientError> {
        let dir = self.node_dir(path)?;
        self.with_store_lock(path, true, &self.cas_retry, || {
            let current = self.read_node(&dir, path)?;
            if !current.matches(expected) {
                return Ok(CasOutcome {
                    succeeded: false,
                    current,
                });
            }
            self.write_node(&dir, path, new)?;
            Ok(CasOutcome {
                succeeded: true,
                current: StoredValue::Present(new.to_vec()),
            })
        })
    }

    fn initialize(&self, path: &str, data: &[u8]) -> Result<bool, ClientError> {
        let dir = self.node_dir(path)?;
        self.with_store_lock(path, true, &self.retry, || {
            if dir.is_dir() {
                return Ok(false);
            }
            if let Some(parent) = dir.parent() {
                fs::create_dir_all(parent).map_err(|e| ClientError::io(path, e))?;
            }
            fs::create_dir(&dir).map_err(|e| ClientError::io(path, e))?;
            self.write_node(&dir, path, data)?;
            Ok(true)
        })
    }

    fn acquire_mutex(&self, path: &str, timeout: Duration) -> Result<Box<dyn Lease>, ClientError> {
        self.ensure_open()?;
        let dir = self.node_dir(path)?;
        fs::create_dir_all(&dir).map_err(|e| ClientError::io(path, e))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LEASE_FILE))
            .map_err(|e| ClientError::io(path, e))?;

        let deadline = Instant::now() + timeout;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ClientError::LockTimeout {
                            path: path.to_string(),
                            timeout,
                        });
                    }
                    std::thread::sleep(LEASE_POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => return Err(ClientError::io(path, e)),
            }
        }

        let acquired_at = Utc::now();
        let expires_at = chrono::Duration::from_std(self.session_timeout)
            .ok()
            .and_then(|d| acquired_at.checked_add_signed(d))
            .unwrap_or(acquired_at);
        let record = LeaseRecord {
            session: self.session.clone(),
            pid: std::process::id(),
            acquired_at,
            expires_at,
        };

        let mut lease = FsLease {
            path: path.to_string(),
            file: Some(file),
        };
        if let Err(e) = lease.write_record(&record) {
            warn!(path, error = %e, "failed to write lease record");
        }
        Ok(Box::new(lease))
    }

    fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        debug!(session = %self.session, "closed fs coordinator");
        Ok(())
    }
}

/// Lease on a `.lease` file; the OS lock is the lease.
#[derive(Debug)]
struct FsLease {
    path: String,
    /// `Some` while the lease is held.
    file: Option<File>,
}

impl FsLease {
    fn write_record(&mut self, record: &LeaseRecord) -> std::io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let json = serde_json::to_vec(record)?;
        file.set_len(0)?;
        // Offset is still zero: the file was opened for this lease.
        file.write_all(&json)?;
        file.sync_data()
    }
}

impl Lease for FsLease {
    fn path(&self) -> &str {
        &self.path
    }

    fn release(&mut self) -> Result<(), ClientError> {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.set_len(0) {
                debug!(path = %self.path, error = %e, "failed to clear lease record");
            }
            FileExt::unlock(&file).map_err(|e| ClientError::io(self.path.clone(), e))?;
        }
        Ok(())
    }
}

impl Drop for FsLease {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
