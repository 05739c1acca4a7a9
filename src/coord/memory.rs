//! coord::memory
//!
//! In-process coordination service.
//!
//! # Design
//!
//! Nodes live in an ordered map keyed by their full path (root namespace
//! included), so subtree operations are prefix range scans. Clones share the
//! same tree, which lets tests model several sites talking to one service.
//! Mutexes are a held-path set guarded by the same lock as the tree and woken
//! through a condition variable.
//!
//! For tests the coordinator can inject failures ([`FailOn`]) and records
//! every call ([`Operation`]).
//!
//! # Example
//!
//! ```
//! use refcoord::coord::{CoordinationClient, MemoryCoordinator, StoredValue};
//!
//! let service = MemoryCoordinator::new();
//! let site_a = service.clone();
//! let site_b = service.clone();
//!
//! assert!(site_a.initialize("/proj1/refs/heads/main", b"abc").unwrap());
//! assert!(!site_b.initialize("/proj1/refs/heads/main", b"def").unwrap());
//! assert_eq!(
//!     site_b.get_data("/proj1/refs/heads/main").unwrap(),
//!     StoredValue::Present(b"abc".to_vec())
//! );
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{CasOutcome, ClientError, CoordinationClient, Lease, StoredValue, DEFAULT_ROOT_NODE};
use crate::core::paths::PathScheme;

/// In-memory coordination service.
///
/// Thread-safe; clones share state.
#[derive(Debug, Clone)]
pub struct MemoryCoordinator {
    shared: Arc<Shared>,
    /// Namespace prefix, e.g. `/refcoord/multi-site`.
    root: String,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct State {
    /// `None` payload marks a node without data.
    nodes: BTreeMap<String, Option<Vec<u8>>>,
    /// Mutex paths currently leased.
    held: BTreeSet<String>,
    fail_on: Option<FailOn>,
    operations: Vec<Operation>,
    closed: bool,
}

/// Which call should fail with [`ClientError::Unavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    CheckExists,
    GetData,
    Delete,
    CompareAndSet,
    Initialize,
    AcquireMutex,
}

/// Recorded call, paths relative to the root namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CheckExists {
        path: String,
    },
    GetData {
        path: String,
    },
    Delete {
        path: String,
        recursive: bool,
    },
    CompareAndSet {
        path: String,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
    },
    Initialize {
        path: String,
        data: Vec<u8>,
    },
    AcquireMutex {
        path: String,
    },
}

impl MemoryCoordinator {
    /// A fresh service using the default root namespace.
    pub fn new() -> Self {
        Self::with_root(DEFAULT_ROOT_NODE)
    }

    /// A fresh service rooted at `root`.
    pub fn with_root(root: &str) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            root: normalize_root(root),
        }
    }

    /// A client on the same service under a different root namespace.
    pub fn namespaced(&self, root: &str) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            root: normalize_root(root),
        }
    }

    /// Configure a call to fail.
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.state().fail_on = Some(fail_on);
        self
    }

    /// Clear the failure configuration.
    pub fn clear_fail_on(&self) {
        self.state().fail_on = None;
    }

    /// All recorded calls, oldest first.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// Clear recorded calls.
    pub fn clear_operations(&self) {
        self.state().operations.clear();
    }

    /// Seed or overwrite a node directly, bypassing the client protocol.
    ///
    /// `None` stores a node without payload. Parents are created as needed.
    pub fn put_node(&self, path: &str, data: Option<&[u8]>) {
        let full = self.full_path(path);
        let mut state = self.state();
        create_parents(&mut state.nodes, &self.root, &full);
        state.nodes.insert(full, data.map(<[u8]>::to_vec));
    }

    /// Inspect a node without recording an operation.
    pub fn node(&self, path: &str) -> StoredValue {
        let full = self.full_path(path);
        to_stored(self.state().nodes.get(&full))
    }

    /// All node paths under this root, relative to it.
    pub fn paths(&self) -> Vec<String> {
        let state = self.state();
        state
            .nodes
            .keys()
            .filter_map(|full| full.strip_prefix(&self.root))
            .filter(|rel| rel.starts_with('/'))
            .map(str::to_string)
            .collect()
    }

    /// Whether the mutex at `path` is currently leased.
    pub fn is_locked(&self, path: &str) -> bool {
        let full = self.full_path(path);
        self.state().held.contains(&full)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn full_path(&self, path: &str) -> String {
        let mut full = self.root.clone();
        for segment in PathScheme::segments(path) {
            full.push('/');
            full.push_str(segment);
        }
        full
    }

    /// Record `op`, then refuse the call if closed or configured to fail.
    fn enter(&self, op: Operation, fail: FailOn) -> Result<MutexGuard<'_, State>, ClientError> {
        let mut state = self.state();
        state.operations.push(op);
        if state.closed {
            return Err(ClientError::Closed);
        }
        if state.fail_on == Some(fail) {
            return Err(ClientError::Unavailable {
                message: format!("injected failure on {fail:?}"),
            });
        }
        Ok(state)
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_root(root: &str) -> String {
    PathScheme::segments(root).fold(String::new(), |mut acc, segment| {
        acc.push('/');
        acc.push_str(segment);
        acc
    })
}

fn to_stored(node: Option<&Option<Vec<u8>>>) -> StoredValue {
    match node {
        None => StoredValue::Absent,
        Some(None) => StoredValue::Tombstone,
        Some(Some(bytes)) => StoredValue::Present(bytes.clone()),
    }
}

fn has_children(nodes: &BTreeMap<String, Option<Vec<u8>>>, full: &str) -> bool {
    let prefix = format!("{full}/");
    nodes
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(key, _)| key.starts_with(&prefix))
}

fn create_parents(nodes: &mut BTreeMap<String, Option<Vec<u8>>>, root: &str, full: &str) {
    let mut cursor = full;
    while let Some(idx) = cursor.rfind('/') {
        cursor = &cursor[..idx];
        if cursor.len() <= root.len() {
            break;
        }
        nodes.entry(cursor.to_string()).or_insert(None);
    }
}

impl CoordinationClient for MemoryCoordinator {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn check_exists(&self, path: &str) -> Result<bool, ClientError> {
        let op = Operation::CheckExists {
            path: path.to_string(),
        };
        let state = self.enter(op, FailOn::CheckExists)?;
        Ok(state.nodes.contains_key(&self.full_path(path)))
    }

    fn get_data(&self, path: &str) -> Result<StoredValue, ClientError> {
        let op = Operation::GetData {
            path: path.to_string(),
        };
        let state = self.enter(op, FailOn::GetData)?;
        Ok(to_stored(state.nodes.get(&self.full_path(path))))
    }

    fn delete(&self, path: &str, recursive: bool) -> Result<(), ClientError> {
        let op = Operation::Delete {
            path: path.to_string(),
            recursive,
        };
        let mut state = self.enter(op, FailOn::Delete)?;
        let full = self.full_path(path);

        if has_children(&state.nodes, &full) {
            if !recursive {
                return Err(ClientError::NotEmpty {
                    path: path.to_string(),
                });
            }
            let prefix = format!("{full}/");
            state.nodes.retain(|key, _| !key.starts_with(&prefix));
        }
        state.nodes.remove(&full);
        Ok(())
    }

    fn compare_and_set(
        &self,
        path: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<CasOutcome, ClientError> {
        let op = Operation::CompareAndSet {
            path: path.to_string(),
            expected: expected.map(<[u8]>::to_vec),
            new: new.to_vec(),
        };
        let mut state = self.enter(op, FailOn::CompareAndSet)?;
        let full = self.full_path(path);

        let current = to_stored(state.nodes.get(&full));
        if !current.matches(expected) {
            return Ok(CasOutcome {
                succeeded: false,
                current,
            });
        }
        state.nodes.insert(full, Some(new.to_vec()));
        Ok(CasOutcome {
            succeeded: true,
            current: StoredValue::Present(new.to_vec()),
        })
    }

    fn initialize(&self, path: &str, data: &[u8]) -> Result<bool, ClientError> {
        let op = Operation::Initialize {
            path: path.to_string(),
            data: data.to_vec(),
        };
        let mut state = self.enter(op, FailOn::Initialize)?;
        let full = self.full_path(path);

        if state.nodes.contains_key(&full) {
            return Ok(false);
        }
        create_parents(&mut state.nodes, &self.root, &full);
        state.nodes.insert(full, Some(data.to_vec()));
        Ok(true)
    }

    fn acquire_mutex(&self, path: &str, timeout: Duration) -> Result<Box<dyn Lease>, ClientError> {
        let op = Operation::AcquireMutex {
            path: path.to_string(),
        };
        let mut state = self.enter(op, FailOn::AcquireMutex)?;
        let full = self.full_path(path);
        let deadline = Instant::now() + timeout;

        while state.held.contains(&full) {
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::LockTimeout {
                    path: path.to_string(),
                    timeout,
                });
            }
            state = self
                .shared
                .released
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if state.closed {
                return Err(ClientError::Closed);
            }
        }
        state.held.insert(full.clone());

        Ok(Box::new(MemoryLease {
            shared: Arc::clone(&self.shared),
            full_path: full,
            path: path.to_string(),
            released: false,
        }))
    }

    fn close(&self) -> Result<(), ClientError> {
        self.state().closed = true;
        self.shared.released.notify_all();
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryLease {
    shared: Arc<Shared>,
    full_path: String,
    path: String,
    released: bool,
}

impl Lease for MemoryLease {
    fn path(&self) -> &str {
        &self.path
    }

    fn release(&mut self) -> Result<(), ClientError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.held.remove(&self.full_path);
        drop(state);
        self.shared.released.notify_all();
        Ok(())
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
