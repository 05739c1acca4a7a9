//! core
//!
//! Core domain types, schemas, and building blocks for refcoord.
//!
//! # Modules
//!
//! - [`types`] - Strong types: ProjectKey, RefName, ObjectId, Ref
//! - [`codec`] - Typed value codecs and their registry
//! - [`paths`] - Centralized path layout in the coordination service
//! - [`retry`] - Bounded exponential backoff
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing
//! - Nothing in here talks to the coordination service

pub mod codec;
pub mod config;
pub mod paths;
pub mod retry;
pub mod types;
