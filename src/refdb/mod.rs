//! refdb
//!
//! Shared ref database operations on top of the coordination client.
//!
//! - [`store`]: compare-and-put, reads, removal and per-ref locking
//! - [`lock`]: bounded-wait mutex with a scoped handle

pub mod lock;
pub mod store;

pub use lock::{DistributedLock, LockError, LockHandle};
pub use store::{Lookup, RefDbError, SharedRefStore};
