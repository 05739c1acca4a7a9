//! coord
//!
//! Client side of the coordination service.
//!
//! # Architecture
//!
//! The coordination service is the single source of truth for shared refs.
//! This module is the **only doorway** to it: everything above talks to a
//! [`CoordinationClient`] addressed by slash-separated paths and never to a
//! backend directly.
//!
//! Two backends are provided:
//!
//! - [`MemoryCoordinator`]: in-process tree, used for embedding and tests
//! - [`FsCoordinator`]: a shared directory, usable across processes
//!
//! Use [`connect`] to build a client from [`CoordinatorSettings`]; the
//! returned handle is created once at startup and passed to whoever needs it.
//! Its lifecycle ends with [`CoordinationClient::close`].
//!
//! # Invariants
//!
//! - `compare_and_set` and `initialize` are atomic per path
//! - A node can exist without a payload ([`StoredValue::Tombstone`])
//! - Mutex leases are exclusive per path across every client of the service
//!
//! # Example
//!
//! ```
//! use refcoord::coord::{connect, CoordinationClient, CoordinatorSettings, Endpoint, StoredValue};
//!
//! let settings = CoordinatorSettings::new(Endpoint::Memory);
//! let client = connect(&settings).unwrap();
//!
//! assert!(client.initialize("/proj1/counter", b"1").unwrap());
//! assert_eq!(client.get_data("/proj1/counter").unwrap(), StoredValue::Present(b"1".to_vec()));
//!
//! let outcome = client.compare_and_set("/proj1/counter", Some(b"1"), b"2").unwrap();
//! assert!(outcome.succeeded);
//! ```

mod fs;
mod memory;

pub use fs::{FsCoordinator, LeaseRecord};
pub use memory::{FailOn, MemoryCoordinator, Operation};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::retry::RetryPolicy;

/// Default root namespace for all paths.
pub const DEFAULT_ROOT_NODE: &str = "refcoord/multi-site";

/// Errors raised by coordination clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service could not be reached or refused the call.
    #[error("coordination service unavailable: {message}")]
    Unavailable { message: String },

    /// The client handle was closed.
    #[error("coordination client is closed")]
    Closed,

    /// Transient contention; the call may succeed if retried.
    #[error("coordination service busy at {path}")]
    Busy { path: String },

    /// A non-recursive delete hit a node with children.
    #[error("node {path} has children")]
    NotEmpty { path: String },

    /// The path cannot be addressed by this backend.
    #[error("invalid coordination path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Mutex not obtained before the deadline.
    #[error("timed out after {timeout:?} waiting for lock {path}")]
    LockTimeout { path: String, timeout: Duration },

    /// Storage-level I/O failure.
    #[error("i/o error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    /// Whether retrying the same call may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Busy { .. })
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        ClientError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Payload state of a path.
///
/// Three-way by construction so callers never infer meaning from null
/// checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// The path was never created (or was removed).
    Absent,
    /// The path exists but carries no payload.
    Tombstone,
    /// The path exists with a payload.
    Present(Vec<u8>),
}

impl StoredValue {
    /// Whether the path exists at all.
    pub fn exists(&self) -> bool {
        !matches!(self, StoredValue::Absent)
    }

    /// Payload bytes, if any.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            StoredValue::Present(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Whether this value satisfies a compare-and-set expectation.
    ///
    /// `None` expects a payload-less node; `Some(bytes)` expects exactly
    /// those bytes. An absent path never matches.
    pub fn matches(&self, expected: Option<&[u8]>) -> bool {
        match (self, expected) {
            (StoredValue::Tombstone, None) => true,
            (StoredValue::Present(current), Some(expected)) => current.as_slice() == expected,
            _ => false,
        }
    }
}

/// Result of a compare-and-set call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasOutcome {
    pub succeeded: bool,
    /// Value at the path after the call.
    pub current: StoredValue,
}

/// A held mutex lease.
///
/// Dropping a lease releases it on a best-effort basis; call
/// [`Lease::release`] to observe release errors.
pub trait Lease: Send + std::fmt::Debug {
    /// Path of the mutex.
    fn path(&self) -> &str;

    /// Release the lease. Calling it more than once is a no-op.
    fn release(&mut self) -> Result<(), ClientError>;
}

/// Operations the shared ref store needs from the coordination service.
///
/// Every call is synchronous and may block on the network or storage.
/// Implementations must be thread-safe.
pub trait CoordinationClient: Send + Sync + std::fmt::Debug {
    /// Short backend name for diagnostics.
    fn backend(&self) -> &'static str;

    /// Whether `path` exists, with or without payload.
    fn check_exists(&self, path: &str) -> Result<bool, ClientError>;

    /// Read the payload state of `path`.
    fn get_data(&self, path: &str) -> Result<StoredValue, ClientError>;

    /// Delete `path`. With `recursive`, the whole subtree goes too.
    /// Deleting a missing path is a no-op.
    fn delete(&self, path: &str, recursive: bool) -> Result<(), ClientError>;

    /// Atomically replace the payload of `path` if it matches `expected`.
    ///
    /// `None` expects a payload-less node. An absent path never matches.
    fn compare_and_set(
        &self,
        path: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<CasOutcome, ClientError>;

    /// Atomically create `path` with `data`, creating parents as needed.
    ///
    /// Returns `false` if the path already existed.
    fn initialize(&self, path: &str, data: &[u8]) -> Result<bool, ClientError>;

    /// Acquire the mutex at `path`, waiting at most `timeout`.
    fn acquire_mutex(&self, path: &str, timeout: Duration) -> Result<Box<dyn Lease>, ClientError>;

    /// End the client's lifecycle. Later calls fail with [`ClientError::Closed`].
    fn close(&self) -> Result<(), ClientError>;
}

/// Where the coordination service lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// In-process service (`memory:`).
    Memory,
    /// Shared directory (`fs:<dir>`).
    Fs(PathBuf),
}

impl std::str::FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "memory" || s == "memory:" {
            return Ok(Endpoint::Memory);
        }
        match s.strip_prefix("fs:") {
            Some(dir) if !dir.is_empty() => Ok(Endpoint::Fs(PathBuf::from(dir))),
            Some(_) => Err("fs endpoint needs a directory, e.g. 'fs:/var/lib/refcoord'".into()),
            None if s.is_empty() => Err("connect endpoint cannot be empty".into()),
            None => Err(format!(
                "unsupported endpoint '{s}', expected 'memory:' or 'fs:<dir>'"
            )),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Memory => write!(f, "memory:"),
            Endpoint::Fs(dir) => write!(f, "fs:{}", dir.display()),
        }
    }
}

/// Resolved connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub endpoint: Endpoint,
    /// Namespace prefix applied to every path.
    pub root_node: String,
    /// Lifetime recorded on mutex leases.
    pub session_timeout: Duration,
    /// Upper bound on establishing the connection, and on each wait for a
    /// busy service.
    pub connection_timeout: Duration,
    /// Retries for ordinary calls.
    pub retry: RetryPolicy,
    /// Retries for compare-and-set calls.
    pub cas_retry: RetryPolicy,
    /// Wait bound for ref locks.
    pub lock_timeout: Duration,
}

impl CoordinatorSettings {
    /// Settings with every value at its default.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            root_node: DEFAULT_ROOT_NODE.to_string(),
            session_timeout: Duration::from_millis(60_000),
            connection_timeout: Duration::from_millis(15_000),
            retry: RetryPolicy::connection_default(),
            cas_retry: RetryPolicy::cas_default(),
            lock_timeout: Duration::from_millis(1000),
        }
    }
}

/// Build a client for `settings`.
///
/// # Errors
///
/// Fails with [`ClientError::Unavailable`] or [`ClientError::Io`] if the
/// service cannot be reached within the connection timeout.
pub fn connect(settings: &CoordinatorSettings) -> Result<Arc<dyn CoordinationClient>, ClientError> {
    let client: Arc<dyn CoordinationClient> = match &settings.endpoint {
        Endpoint::Memory => Arc::new(MemoryCoordinator::with_root(&settings.root_node)),
        Endpoint::Fs(dir) => Arc::new(FsCoordinator::open(dir, settings)?),
    };
    tracing::info!(
        backend = client.backend(),
        endpoint = %settings.endpoint,
        root = %settings.root_node,
        "connected to coordination service"
    );
    Ok(client)
}
