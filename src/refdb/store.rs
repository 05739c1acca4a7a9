//! refdb::store
//!
//! The shared ref store: compare-and-put of refs and typed values against
//! the coordination service, plus per-ref locking.
//!
//! # Protocol
//!
//! Writes never read-then-write. A ref update is one of:
//!
//! 1. **Initialize** when the caller expects nothing there (null or zero
//!    old id) and the path is absent
//! 2. **Compare-and-set** of the encoded old id against the stored bytes
//! 3. **Initialize again** if the compare-and-set failed because the path
//!    vanished in between
//!
//! A node holding no payload counts as the tombstone id: if the first
//! compare-and-set expected the tombstone and found an empty node, it is
//! retried expecting the empty node. Likewise, a stored id written with
//! different hex casing is retried against the bytes actually stored.
//!
//! A `false` result means "refresh local state and retry"; errors are
//! reserved for the service misbehaving.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use refcoord::coord::MemoryCoordinator;
//! use refcoord::core::codec::CodecRegistry;
//! use refcoord::core::types::{ObjectId, ProjectKey, Ref, RefName};
//! use refcoord::refdb::SharedRefStore;
//!
//! let store = SharedRefStore::new(
//!     Arc::new(MemoryCoordinator::new()),
//!     CodecRegistry::builtin(),
//!     std::time::Duration::from_millis(100),
//! );
//! let project = ProjectKey::new("proj1").unwrap();
//! let main = RefName::new("refs/heads/main").unwrap();
//! let a = ObjectId::new("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
//!
//! assert!(store.compare_and_put(&project, &Ref::deleted(main.clone()), Some(a)).unwrap());
//! assert!(store.is_up_to_date(&project, &Ref::new(main, Some(a))).unwrap());
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::coord::{
    self, CasOutcome, ClientError, CoordinationClient, CoordinatorSettings, StoredValue,
};
use crate::core::codec::{Codec, CodecError, CodecRegistry, RefValue, ValueKind};
use crate::core::paths::PathScheme;
use crate::core::types::{ObjectId, ProjectKey, Ref, RefName};

use super::lock::{DistributedLock, LockError, LockHandle};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from shared ref store operations.
#[derive(Debug, Error)]
pub enum RefDbError {
    /// The coordination service could not answer a read.
    #[error("coordination service unreachable for {path}: {source}")]
    Connectivity {
        path: String,
        #[source]
        source: ClientError,
    },

    /// A ref could not be locked or checked under lock semantics.
    #[error("unable to verify or lock {ref_name} in project {project}: {source}")]
    LockAcquisition {
        project: String,
        ref_name: String,
        #[source]
        source: BoxError,
    },

    /// No codec registered for the requested value type.
    #[error("no codec registered for {kind}")]
    CodecNotFound { kind: ValueKind },

    /// The stored payload does not decode as the requested type.
    #[error("cannot decode value at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: CodecError,
    },

    /// Unexpected failure of a write-path call.
    #[error("{message}: {source}")]
    System {
        message: String,
        #[source]
        source: ClientError,
    },

    /// The lock around a critical section could not be released.
    #[error("failed to release lock {path}: {source}")]
    LockRelease {
        path: String,
        #[source]
        source: LockError,
    },
}

impl RefDbError {
    fn lock_acquisition(project: &ProjectKey, name: &RefName, source: impl Into<BoxError>) -> Self {
        RefDbError::LockAcquisition {
            project: project.to_string(),
            ref_name: name.to_string(),
            source: source.into(),
        }
    }

    fn system(message: impl Into<String>, source: ClientError) -> Self {
        RefDbError::System {
            message: message.into(),
            source,
        }
    }
}

/// Result of a precise typed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The path was never created.
    Missing,
    /// The path exists without a payload.
    Cleared,
    Found(T),
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Missing | Lookup::Cleared => None,
        }
    }
}

/// Shared ref store over a coordination client.
///
/// Holds no remote state; every call round-trips to the service. Cheap to
/// share across threads.
#[derive(Debug, Clone)]
pub struct SharedRefStore {
    client: Arc<dyn CoordinationClient>,
    codecs: CodecRegistry,
    lock_timeout: Duration,
}

impl SharedRefStore {
    /// Build a store over an existing client.
    ///
    /// The object-id codec is always registered since ref operations need it.
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        codecs: CodecRegistry,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            client,
            codecs: codecs.with_builtin::<ObjectId>(),
            lock_timeout,
        }
    }

    /// Connect according to `settings` and build a store.
    pub fn from_settings(
        settings: &CoordinatorSettings,
        codecs: CodecRegistry,
    ) -> Result<Self, RefDbError> {
        let client = coord::connect(settings).map_err(|source| RefDbError::Connectivity {
            path: settings.endpoint.to_string(),
            source,
        })?;
        Ok(Self::new(client, codecs, settings.lock_timeout))
    }

    pub fn client(&self) -> &Arc<dyn CoordinationClient> {
        &self.client
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Whether the ref's path exists, tombstoned or not.
    pub fn exists(&self, project: &ProjectKey, name: &RefName) -> Result<bool, RefDbError> {
        let path = PathScheme::value_path(project, name);
        self.client
            .check_exists(&path)
            .map_err(|source| RefDbError::Connectivity { path, source })
    }

    /// Whether the local ref agrees with the shared value.
    ///
    /// Absent paths are up to date; payload-less paths never are.
    ///
    /// # Errors
    ///
    /// [`RefDbError::LockAcquisition`] if the service fails or the stored
    /// payload is not an object id.
    pub fn is_up_to_date(&self, project: &ProjectKey, local: &Ref) -> Result<bool, RefDbError> {
        let path = PathScheme::value_path(project, &local.name);
        let stored = self
            .client
            .get_data(&path)
            .map_err(|e| RefDbError::lock_acquisition(project, &local.name, e))?;

        match stored {
            StoredValue::Absent => Ok(true),
            StoredValue::Tombstone => {
                debug!(%path, "shared value cleared, local ref is stale");
                Ok(false)
            }
            StoredValue::Present(bytes) => {
                let remote = self
                    .object_id_codec()?
                    .decode(&bytes)
                    .map_err(|e| RefDbError::lock_acquisition(project, &local.name, e))?;
                Ok(remote == local.id_or_zero())
            }
        }
    }

    /// Move a ref from `old`'s id to `new_value` (tombstone when `None`).
    ///
    /// Returns `false` when the shared value no longer matches `old`.
    ///
    /// # Errors
    ///
    /// [`RefDbError::System`] if the service fails.
    pub fn compare_and_put(
        &self,
        project: &ProjectKey,
        old: &Ref,
        new_value: Option<ObjectId>,
    ) -> Result<bool, RefDbError> {
        let path = PathScheme::value_path(project, &old.name);
        let codec = self.object_id_codec()?;
        let new_bytes = codec.encode(&new_value.unwrap_or_else(ObjectId::zero));

        let result = self.put_ref(&path, &codec, old, &new_bytes);
        match &result {
            Ok(updated) => debug!(%path, updated, "compare-and-put"),
            Err(e) => warn!(%path, error = %e, "compare-and-put failed"),
        }
        result
    }

    fn put_ref(
        &self,
        path: &str,
        codec: &Codec<ObjectId>,
        old: &Ref,
        new_bytes: &[u8],
    ) -> Result<bool, RefDbError> {
        let fail = |what: &str| {
            let message = format!("failed to {what} {path}");
            move |source: ClientError| RefDbError::system(message, source)
        };

        if old.is_deletion() && !self.client.check_exists(path).map_err(fail("check"))? {
            return self.client.initialize(path, new_bytes).map_err(fail("create"));
        }

        let expected = codec.encode(&old.id_or_zero());
        let mut outcome = self
            .client
            .compare_and_set(path, Some(&expected), new_bytes)
            .map_err(fail("update"))?;

        if !outcome.succeeded && outcome.current == StoredValue::Tombstone && old.is_deletion() {
            debug!(path, "retrying against cleared node");
            outcome = self
                .client
                .compare_and_set(path, None, new_bytes)
                .map_err(fail("update"))?;
        }

        if let Some(stored) = same_id_other_encoding(codec, &outcome, old) {
            debug!(path, "retrying against stored encoding of the same id");
            outcome = self
                .client
                .compare_and_set(path, Some(&stored), new_bytes)
                .map_err(fail("update"))?;
        }

        if outcome.succeeded {
            return Ok(true);
        }
        if !self.client.check_exists(path).map_err(fail("check"))? {
            debug!(path, "path vanished during update, creating");
            return self.client.initialize(path, new_bytes).map_err(fail("create"));
        }
        Ok(false)
    }

    /// Typed compare-and-put of an arbitrary value.
    ///
    /// `expected == None` creates the path when absent and otherwise expects
    /// a payload-less node. Unlike [`Self::compare_and_put`] there is no
    /// second attempt when the path vanishes mid-update.
    pub fn compare_and_put_value<T: RefValue>(
        &self,
        project: &ProjectKey,
        name: &RefName,
        expected: Option<&T>,
        new_value: &T,
    ) -> Result<bool, RefDbError> {
        let codec = self.codec::<T>()?;
        let path = PathScheme::value_path(project, name);
        let new_bytes = codec.encode(new_value);

        let result = self.put_value(&path, &codec, expected, &new_bytes);
        match &result {
            Ok(updated) => debug!(%path, kind = %codec.kind(), updated, "compare-and-put value"),
            Err(e) => warn!(%path, error = %e, "compare-and-put value failed"),
        }
        result
    }

    fn put_value<T>(
        &self,
        path: &str,
        codec: &Codec<T>,
        expected: Option<&T>,
        new_bytes: &[u8],
    ) -> Result<bool, RefDbError> {
        if expected.is_none()
            && !self
                .client
                .check_exists(path)
                .map_err(|e| RefDbError::system(format!("failed to check {path}"), e))?
        {
            return self
                .client
                .initialize(path, new_bytes)
                .map_err(|e| RefDbError::system(format!("failed to create {path}"), e));
        }

        let expected = expected.map(|value| codec.encode(value));
        self.client
            .compare_and_set(path, expected.as_deref(), new_bytes)
            .map(|outcome| outcome.succeeded)
            .map_err(|e| RefDbError::system(format!("failed to update {path}"), e))
    }

    /// Read a typed value, distinguishing absence, clearing and decode
    /// failures.
    pub fn try_get<T: RefValue>(
        &self,
        project: &ProjectKey,
        name: &RefName,
    ) -> Result<Lookup<T>, RefDbError> {
        let codec = self.codec::<T>()?;
        let path = PathScheme::value_path(project, name);
        let stored = self
            .client
            .get_data(&path)
            .map_err(|source| RefDbError::Connectivity {
                path: path.clone(),
                source,
            })?;

        match stored {
            StoredValue::Absent => Ok(Lookup::Missing),
            StoredValue::Tombstone => Ok(Lookup::Cleared),
            StoredValue::Present(bytes) => codec
                .decode(&bytes)
                .map(Lookup::Found)
                .map_err(|source| RefDbError::Decode { path, source }),
        }
    }

    /// Read a typed value, degrading every failure except a missing codec to
    /// `None`.
    ///
    /// Failures are logged. Use [`Self::try_get`] to observe them.
    pub fn get<T: RefValue>(
        &self,
        project: &ProjectKey,
        name: &RefName,
    ) -> Result<Option<T>, RefDbError> {
        match self.try_get(project, name) {
            Ok(lookup) => Ok(lookup.into_option()),
            Err(e @ RefDbError::CodecNotFound { .. }) => Err(e),
            Err(e) => {
                let kind = T::KIND;
                error!(%project, %name, %kind, error = %e, "cannot read shared value");
                Ok(None)
            }
        }
    }

    /// Delete every shared value and nested node of `project`.
    pub fn remove(&self, project: &ProjectKey) -> Result<(), RefDbError> {
        let path = PathScheme::project_path(project);
        self.client
            .delete(&path, true)
            .map_err(|e| RefDbError::system(format!("failed to remove project {project}"), e))?;
        debug!(%path, "project removed");
        Ok(())
    }

    /// Lock a ref, waiting up to the configured lock timeout.
    pub fn lock_ref(&self, project: &ProjectKey, name: &RefName) -> Result<LockHandle, RefDbError> {
        self.lock_ref_with_timeout(project, name, self.lock_timeout)
    }

    /// Lock a ref with an explicit wait bound.
    pub fn lock_ref_with_timeout(
        &self,
        project: &ProjectKey,
        name: &RefName,
        timeout: Duration,
    ) -> Result<LockHandle, RefDbError> {
        let lock = DistributedLock::new(PathScheme::lock_path(project, name), timeout);
        lock.acquire(self.client.as_ref())
            .map_err(|e| RefDbError::lock_acquisition(project, name, e))
    }

    /// Run `f` while holding the ref's lock.
    ///
    /// The lock is released on every exit path, including panics.
    pub fn with_ref_lock<T>(
        &self,
        project: &ProjectKey,
        name: &RefName,
        f: impl FnOnce() -> T,
    ) -> Result<T, RefDbError> {
        let mut handle = self.lock_ref(project, name)?;
        let value = f();
        handle.release().map_err(|source| RefDbError::LockRelease {
            path: handle.path().to_string(),
            source,
        })?;
        Ok(value)
    }

    /// End the client's lifecycle.
    pub fn close(&self) -> Result<(), RefDbError> {
        self.client
            .close()
            .map_err(|e| RefDbError::system("failed to close coordination client", e))
    }

    fn codec<T: RefValue>(&self) -> Result<Codec<T>, RefDbError> {
        self.codecs
            .resolve::<T>()
            .map_err(|_| RefDbError::CodecNotFound { kind: T::KIND })
    }

    fn object_id_codec(&self) -> Result<Codec<ObjectId>, RefDbError> {
        self.codec::<ObjectId>()
    }
}

/// Stored bytes of a failed compare-and-set that still name `old`'s id,
/// e.g. the same hex in upper case.
fn same_id_other_encoding(
    codec: &Codec<ObjectId>,
    outcome: &CasOutcome,
    old: &Ref,
) -> Option<Vec<u8>> {
    match &outcome.current {
        StoredValue::Present(stored) if !outcome.succeeded => codec
            .decode(stored)
            .is_ok_and(|id| id == old.id_or_zero())
            .then(|| stored.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{FailOn, MemoryCoordinator, Operation};

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const ZERO: &str = "0000000000000000000000000000000000000000";

    fn setup() -> (MemoryCoordinator, SharedRefStore) {
        let coord = MemoryCoordinator::new();
        let store = SharedRefStore::new(
            Arc::new(coord.clone()),
            CodecRegistry::builtin(),
            Duration::from_millis(50),
        );
        (coord, store)
    }

    fn project() -> ProjectKey {
        ProjectKey::new("proj1").unwrap()
    }

    fn main_ref() -> RefName {
        RefName::new("refs/heads/main").unwrap()
    }

    fn oid(hex: &str) -> ObjectId {
        ObjectId::new(hex).unwrap()
    }

    const MAIN_PATH: &str = "/proj1/refs/heads/main";

    #[test]
    fn first_write_initializes() {
        let (coord, store) = setup();
        let created = store
            .compare_and_put(&project(), &Ref::deleted(main_ref()), Some(oid(A)))
            .unwrap();
        assert!(created);
        assert_eq!(coord.node(MAIN_PATH), StoredValue::Present(A.as_bytes().to_vec()));
    }

    #[test]
    fn null_old_id_initializes() {
        let (coord, store) = setup();
        let old = Ref::new(main_ref(), None);
        assert!(store.compare_and_put(&project(), &old, Some(oid(A))).unwrap());
        assert_eq!(coord.node(MAIN_PATH), StoredValue::Present(A.as_bytes().to_vec()));
    }

    #[test]
    fn stale_zero_write_fails() {
        let (coord, store) = setup();
        let old = Ref::deleted(main_ref());
        assert!(store.compare_and_put(&project(), &old, Some(oid(A))).unwrap());
        assert!(!store.compare_and_put(&project(), &old, Some(oid(B))).unwrap());
        assert_eq!(coord.node(MAIN_PATH), StoredValue::Present(A.as_bytes().to_vec()));
    }

    #[test]
    fn delete_writes_tombstone_id() {
        let (coord, store) = setup();
        coord.put_node(MAIN_PATH, Some(A.as_bytes()));
        let old = Ref::new(main_ref(), Some(oid(A)));
        assert!(store.compare_and_put(&project(), &old, None).unwrap());
        assert_eq!(coord.node(MAIN_PATH), StoredValue::Present(ZERO.as_bytes().to_vec()));
    }

    #[test]
    fn cleared_node_accepts_tombstone_expectation() {
        let (coord, store) = setup();
        coord.put_node(MAIN_PATH, None);
        let old = Ref::deleted(main_ref());
        assert!(store.compare_and_put(&project(), &old, Some(oid(B))).unwrap());
        assert_eq!(coord.node(MAIN_PATH), StoredValue::Present(B.as_bytes().to_vec()));
    }

    #[test]
    fn uppercase_stored_id_still_matches() {
        let (coord, store) = setup();
        let upper = A.to_uppercase();
        coord.put_node(MAIN_PATH, Some(upper.as_bytes()));
        let old = Ref::new(main_ref(), Some(oid(A)));

        assert!(store.is_up_to_date(&project(), &old).unwrap());
        assert!(store.compare_and_put(&project(), &old, Some(oid(B))).unwrap());
        assert_eq!(coord.node(MAIN_PATH), StoredValue::Present(B.as_bytes().to_vec()));
    }

    #[test]
    fn uppercase_other_id_still_refused() {
        let (coord, store) = setup();
        let upper = B.to_uppercase();
        coord.put_node(MAIN_PATH, Some(upper.as_bytes()));
        let old = Ref::new(main_ref(), Some(oid(A)));

        assert!(!store.compare_and_put(&project(), &old, Some(oid(A))).unwrap());
        assert_eq!(coord.node(MAIN_PATH), StoredValue::Present(upper.into_bytes()));
    }

    #[test]
    fn vanished_path_is_recreated() {
        let (coord, store) = setup();
        // Non-deletion old ref skips the initial existence check; the CAS
        // then finds nothing and the fallback creates the path.
        let old = Ref::new(main_ref(), Some(oid(A)));
        assert!(store.compare_and_put(&project(), &old, Some(oid(B))).unwrap());

        let ops = coord.operations();
        assert!(matches!(ops[0], Operation::CompareAndSet { .. }));
        assert!(matches!(ops[1], Operation::CheckExists { .. }));
        assert!(matches!(ops[2], Operation::Initialize { .. }));
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn up_to_date_cases() {
        let (coord, store) = setup();
        let local = Ref::new(main_ref(), Some(oid(A)));
        assert!(store.is_up_to_date(&project(), &local).unwrap());

        coord.put_node(MAIN_PATH, None);
        assert!(!store.is_up_to_date(&project(), &local).unwrap());

        coord.put_node(MAIN_PATH, Some(A.as_bytes()));
        assert!(store.is_up_to_date(&project(), &local).unwrap());

        coord.put_node(MAIN_PATH, Some(B.as_bytes()));
        assert!(!store.is_up_to_date(&project(), &local).unwrap());
    }

    #[test]
    fn up_to_date_garbage_is_lock_error() {
        let (coord, store) = setup();
        coord.put_node(MAIN_PATH, Some(b"not-an-id"));
        let local = Ref::new(main_ref(), Some(oid(A)));
        assert!(matches!(
            store.is_up_to_date(&project(), &local),
            Err(RefDbError::LockAcquisition { .. })
        ));
    }

    #[test]
    fn write_failures_are_system_errors() {
        let (coord, store) = setup();
        let coord = coord.fail_on(FailOn::Initialize);
        let err = store
            .compare_and_put(&project(), &Ref::deleted(main_ref()), Some(oid(A)))
            .unwrap_err();
        assert!(matches!(err, RefDbError::System { .. }));
        assert!(err.to_string().contains(MAIN_PATH));
        coord.clear_fail_on();
    }

    #[test]
    fn get_degrades_on_failure() {
        let (coord, store) = setup();
        coord.put_node("/proj1/counter", Some(b"x1"));
        let counter = RefName::new("counter").unwrap();

        assert_eq!(store.get::<i32>(&project(), &counter).unwrap(), None);
        assert!(matches!(
            store.try_get::<i32>(&project(), &counter),
            Err(RefDbError::Decode { .. })
        ));
    }

    #[test]
    fn get_requires_registered_codec() {
        let coord = MemoryCoordinator::new();
        let store = SharedRefStore::new(
            Arc::new(coord),
            CodecRegistry::empty(),
            Duration::from_millis(50),
        );
        let key = RefName::new("counter").unwrap();
        assert!(matches!(
            store.get::<i64>(&project(), &key),
            Err(RefDbError::CodecNotFound {
                kind: ValueKind::Int64
            })
        ));
        // Object ids are always available
        assert_eq!(store.get::<ObjectId>(&project(), &key).unwrap(), None);
    }

    #[test]
    fn lookup_distinguishes_cleared() {
        let (coord, store) = setup();
        let key = RefName::new("counter").unwrap();
        assert_eq!(store.try_get::<i32>(&project(), &key).unwrap(), Lookup::Missing);
        coord.put_node("/proj1/counter", None);
        assert_eq!(store.try_get::<i32>(&project(), &key).unwrap(), Lookup::Cleared);
    }

    #[test]
    fn with_ref_lock_releases() {
        let (coord, store) = setup();
        let value = store
            .with_ref_lock(&project(), &main_ref(), || {
                assert!(coord.is_locked("/locks/proj1/refs/heads/main"));
                42
            })
            .unwrap();
        assert_eq!(value, 42);
        assert!(!coord.is_locked("/locks/proj1/refs/heads/main"));
    }
}
