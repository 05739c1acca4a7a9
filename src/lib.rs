//! refcoord - shared ref coordination for multi-site servers
//!
//! Several sites keep local copies of the same refs and agree on the
//! authoritative value of each one through a coordination service. This
//! crate is the coordination layer: compare-and-put of refs with tombstones,
//! typed compare-and-put of arbitrary values, and per-ref distributed locks.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to the store)
//! - [`refdb`] - Shared ref store and distributed locks
//! - [`coord`] - Single interface to the coordination service, with backends
//! - [`core`] - Domain types, codecs, path layout, retry policy and config
//! - [`ui`] - Output utilities
//!
//! # Correctness Invariants
//!
//! 1. At most one of several concurrent updates with the same expectation wins
//! 2. A failed compare-and-put leaves the shared value untouched
//! 3. Locks are released on every exit path
//! 4. No shared state is cached; every call reaches the service

pub mod cli;
pub mod coord;
pub mod core;
pub mod refdb;
pub mod ui;
