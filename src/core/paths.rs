//! core::paths
//!
//! Centralized path routing for the coordination-service key space.
//!
//! # Layout
//!
//! All paths are relative to the client's root namespace:
//! - `/{project}` - Project subtree, removed as a whole by `remove`
//! - `/{project}/{ref}` - Stored value of a reference or generic key
//! - `/locks/{project}/{ref}` - Mutex lease for a reference
//!
//! **Hard rule:** no code outside this module formats coordination paths.
//!
//! # Example
//!
//! ```
//! use refcoord::core::paths::PathScheme;
//! use refcoord::core::types::{ProjectKey, RefName};
//!
//! let project = ProjectKey::new("proj1").unwrap();
//! let name = RefName::new("refs/heads/main").unwrap();
//!
//! assert_eq!(PathScheme::value_path(&project, &name), "/proj1/refs/heads/main");
//! assert_eq!(PathScheme::lock_path(&project, &name), "/locks/proj1/refs/heads/main");
//! ```

use crate::core::types::{ProjectKey, RefName};

/// Prefix of the lock subtree.
pub const LOCKS_PREFIX: &str = "/locks";

/// Pure mapping from (project, ref) to coordination paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathScheme;

impl PathScheme {
    /// Path of a project's subtree.
    pub fn project_path(project: &ProjectKey) -> String {
        format!("/{}", project.as_str())
    }

    /// Path holding the value of `name` inside `project`.
    pub fn value_path(project: &ProjectKey, name: &RefName) -> String {
        format!("/{}/{}", project.as_str(), name.as_str())
    }

    /// Path of the mutex guarding `name` inside `project`.
    pub fn lock_path(project: &ProjectKey, name: &RefName) -> String {
        format!("{}{}", LOCKS_PREFIX, Self::value_path(project, name))
    }

    /// Split a coordination path into its non-empty segments.
    ///
    /// Backends use this to map paths onto their own storage.
    pub fn segments(path: &str) -> impl Iterator<Item = &str> {
        path.split('/').filter(|s| !s.is_empty())
    }

    /// Check that `path` lies in the subtree rooted at `root`.
    pub fn is_within(path: &str, root: &str) -> bool {
        path == root
            || path
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}
