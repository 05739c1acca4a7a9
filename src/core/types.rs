//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`ProjectKey`] - Validated project identifier
//! - [`RefName`] - Validated reference name within a project
//! - [`ObjectId`] - 20-byte content hash (SHA-1)
//! - [`Ref`] - A local reference: name plus optional object id
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, so every path derived from them is well formed.
//!
//! # Examples
//!
//! ```
//! use refcoord::core::types::{ObjectId, ProjectKey, Ref, RefName};
//!
//! let project = ProjectKey::new("plugins/replication").unwrap();
//! let name = RefName::new("refs/heads/main").unwrap();
//! let oid = ObjectId::new("abc123def4567890abc123def4567890abc12345").unwrap();
//! let local = Ref::new(name, Some(oid));
//!
//! assert_eq!(project.as_str(), "plugins/replication");
//! assert!(!local.is_deletion());
//!
//! // Invalid constructions fail at creation time
//! assert!(RefName::new("invalid..name").is_err());
//! assert!(ObjectId::new("not-a-sha").is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::paths::LOCKS_PREFIX;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid project name: {0}")]
    InvalidProject(String),

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),
}

/// A validated project identifier.
///
/// Projects form the first segment(s) of every coordination path, so the
/// name must be usable as a path prefix:
/// - Cannot be empty
/// - Cannot start or end with `/`
/// - Cannot contain empty, `.` or `..` segments
/// - Cannot contain ASCII control characters
/// - Cannot start with the `locks` segment, which holds ref mutexes
///
/// Nested names such as `plugins/replication` are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectKey(String);

impl ProjectKey {
    /// Create a new validated project key.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidProject` if the name cannot form a path prefix.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidProject(
                "project name cannot be empty".into(),
            ));
        }
        if name.starts_with('/') || name.ends_with('/') {
            return Err(TypeError::InvalidProject(
                "project name cannot start or end with '/'".into(),
            ));
        }
        if name.chars().any(|c| c.is_ascii_control()) {
            return Err(TypeError::InvalidProject(
                "project name cannot contain control characters".into(),
            ));
        }
        for segment in name.split('/') {
            match segment {
                "" => {
                    return Err(TypeError::InvalidProject(
                        "project name cannot contain '//'".into(),
                    ))
                }
                "." | ".." => {
                    return Err(TypeError::InvalidProject(format!(
                        "project name cannot contain a '{segment}' segment"
                    )))
                }
                s if s.starts_with('.') => {
                    return Err(TypeError::InvalidProject(
                        "path component cannot start with '.'".into(),
                    ))
                }
                _ => {}
            }
        }
        let lock_root = LOCKS_PREFIX.trim_start_matches('/');
        if name.split('/').next() == Some(lock_root) {
            return Err(TypeError::InvalidProject(format!(
                "'{lock_root}' is reserved for ref locks"
            )));
        }
        Ok(())
    }

    /// Get the project key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectKey {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ProjectKey> for String {
    fn from(key: ProjectKey) -> Self {
        key.0
    }
}

impl AsRef<str> for ProjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 20-byte object identifier.
///
/// The textual form is 40 hex characters. Parsing accepts either case and
/// [`Display`](std::fmt::Display) always renders lowercase.
///
/// The all-zero id is the tombstone marker: the reference was deliberately
/// deleted, which is different from a path that was never created.
///
/// # Example
///
/// ```
/// use refcoord::core::types::ObjectId;
///
/// let oid = ObjectId::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.to_string(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(oid.short(7), "abc123d");
///
/// let zero = ObjectId::zero();
/// assert!(zero.is_zero());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId([u8; ObjectId::LEN]);

impl ObjectId {
    /// Raw length in bytes.
    pub const LEN: usize = 20;

    /// Length of the hex encoding.
    pub const HEX_LEN: usize = Self::LEN * 2;

    /// Parse an object id from its 40-character hex form.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidObjectId` on a bad length or non-hex input.
    pub fn new(hex_str: impl AsRef<str>) -> Result<Self, TypeError> {
        Self::from_hex(hex_str.as_ref().as_bytes())
    }

    /// Parse an object id from ASCII hex bytes.
    pub fn from_hex(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != Self::HEX_LEN {
            return Err(TypeError::InvalidObjectId(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                bytes.len()
            )));
        }
        let mut raw = [0u8; Self::LEN];
        hex::decode_to_slice(bytes, &mut raw).map_err(|_| {
            TypeError::InvalidObjectId("object id must be hexadecimal".into())
        })?;
        Ok(Self(raw))
    }

    /// Build an object id from raw bytes.
    pub fn from_bytes(raw: [u8; Self::LEN]) -> Self {
        Self(raw)
    }

    /// The zero id, used as the tombstone marker.
    pub const fn zero() -> Self {
        Self([0u8; Self::LEN])
    }

    /// Check if this is the zero/tombstone id.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated hex form, at most `len` characters.
    pub fn short(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len.min(Self::HEX_LEN));
        hex
    }
}

impl TryFrom<String> for ObjectId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ObjectId> for String {
    fn from(oid: ObjectId) -> Self {
        oid.to_hex()
    }
}

impl std::str::FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

/// A validated reference name.
///
/// Follows Git's refname rules (see `git check-ref-format`) except that a
/// `refs/` prefix is not required, so plain keys like `counter` are valid
/// names for generic values.
///
/// # Example
///
/// ```
/// use refcoord::core::types::RefName;
///
/// let refname = RefName::new("refs/heads/main").unwrap();
/// assert_eq!(refname.as_str(), "refs/heads/main");
///
/// assert!(RefName::new("counter").is_ok());
/// assert!(RefName::new("refs/heads/main.lock").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

/// Substrings Git refuses anywhere in a refname.
const FORBIDDEN_SEQUENCES: [&str; 3] = ["..", "@{", "//"];

/// Characters Git refuses anywhere in a refname.
const FORBIDDEN_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];

impl RefName {
    /// Validate `name` and wrap it.
    ///
    /// # Errors
    ///
    /// `TypeError::InvalidRefName` naming the first rule the name breaks.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        match Self::violation(&name) {
            Some(reason) => Err(TypeError::InvalidRefName(format!("'{name}' {reason}"))),
            None => Ok(Self(name)),
        }
    }

    fn violation(name: &str) -> Option<String> {
        if name.is_empty() {
            return Some("is empty".into());
        }
        if name.starts_with('/') || name.ends_with('/') {
            return Some("has a leading or trailing '/'".into());
        }
        if let Some(seq) = FORBIDDEN_SEQUENCES.iter().find(|seq| name.contains(**seq)) {
            return Some(format!("contains '{seq}'"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_ascii_control())
        {
            return Some(format!("contains forbidden character {c:?}"));
        }
        // Dot-prefixed segments would shadow node payload files in the fs backend
        name.split('/').find_map(|segment| {
            if segment.starts_with('.') {
                Some(format!("has segment '{segment}' starting with '.'"))
            } else if segment.ends_with(".lock") {
                Some(format!("has segment '{segment}' ending in '.lock'"))
            } else {
                None
            }
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference as seen by the local site.
///
/// `object_id` is `None` when the local side has no value for the ref at
/// all; comparisons treat that like the tombstone id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub name: RefName,
    pub object_id: Option<ObjectId>,
}

impl Ref {
    pub fn new(name: RefName, object_id: Option<ObjectId>) -> Self {
        Self { name, object_id }
    }

    /// A ref whose local value is the tombstone id.
    pub fn deleted(name: RefName) -> Self {
        Self::new(name, Some(ObjectId::zero()))
    }

    /// The local id with `None` folded into the tombstone.
    pub fn id_or_zero(&self) -> ObjectId {
        self.object_id.unwrap_or_else(ObjectId::zero)
    }

    /// True when the local side expects nothing to exist remotely.
    pub fn is_deletion(&self) -> bool {
        self.object_id.map_or(true, |id| id.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod project_key {
        use super::*;

        #[test]
        fn valid_projects() {
            assert!(ProjectKey::new("proj1").is_ok());
            assert!(ProjectKey::new("plugins/replication").is_ok());
            assert!(ProjectKey::new("All-Projects").is_ok());
            assert!(ProjectKey::new("A_TEST_PROJECT_NAME").is_ok());
        }

        #[test]
        fn empty_rejected() {
            assert!(ProjectKey::new("").is_err());
        }

        #[test]
        fn slashes_at_edges_rejected() {
            assert!(ProjectKey::new("/proj").is_err());
            assert!(ProjectKey::new("proj/").is_err());
            assert!(ProjectKey::new("a//b").is_err());
        }

        #[test]
        fn dot_segments_rejected() {
            assert!(ProjectKey::new("..").is_err());
            assert!(ProjectKey::new("a/../b").is_err());
            assert!(ProjectKey::new("a/./b").is_err());
            assert!(ProjectKey::new(".hidden").is_err());
        }

        #[test]
        fn control_chars_rejected() {
            assert!(ProjectKey::new("has\nnewline").is_err());
        }

        #[test]
        fn lock_subtree_reserved() {
            let err = ProjectKey::new("locks").unwrap_err();
            assert!(err.to_string().contains("reserved for ref locks"));
            assert!(ProjectKey::new("locks/nested").is_err());
            assert!(ProjectKey::new("locksmith").is_ok());
            assert!(ProjectKey::new("team/locks").is_ok());
        }

        #[test]
        fn serde_roundtrip() {
            let key = ProjectKey::new("plugins/replication").unwrap();
            let json = serde_json::to_string(&key).unwrap();
            let parsed: ProjectKey = serde_json::from_str(&json).unwrap();
            assert_eq!(key, parsed);
        }
    }

    mod object_id {
        use super::*;

        #[test]
        fn valid_sha1() {
            assert!(ObjectId::new("abc123def4567890abc123def4567890abc12345").is_ok());
        }

        #[test]
        fn accepts_uppercase_renders_lowercase() {
            let oid = ObjectId::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
            assert_eq!(oid.to_string(), "abc123def4567890abc123def4567890abc12345");
        }

        #[test]
        fn zero_oid() {
            let zero = ObjectId::zero();
            assert!(zero.is_zero());
            assert_eq!(zero.to_hex(), "0".repeat(40));
        }

        #[test]
        fn non_zero_is_not_zero() {
            let oid = ObjectId::new("0000000000000000000000000000000000000001").unwrap();
            assert!(!oid.is_zero());
        }

        #[test]
        fn short_form() {
            let oid = ObjectId::new("abc123def4567890abc123def4567890abc12345").unwrap();
            assert_eq!(oid.short(7), "abc123d");
            assert_eq!(oid.short(100), oid.to_hex());
        }

        #[test]
        fn invalid_length() {
            assert!(ObjectId::new("").is_err());
            assert!(ObjectId::new("abc123").is_err());
            // SHA-256 length is not a valid 20-byte id
            assert!(ObjectId::new("a".repeat(64)).is_err());
        }

        #[test]
        fn non_hex_rejected() {
            assert!(ObjectId::new("xyz123def4567890abc123def4567890abc12345").is_err());
        }

        #[test]
        fn from_bytes_matches_hex() {
            let mut raw = [0u8; ObjectId::LEN];
            raw[19] = 0xff;
            let oid = ObjectId::from_bytes(raw);
            assert_eq!(oid.to_hex(), format!("{}ff", "0".repeat(38)));
            assert_eq!(oid.as_bytes(), &raw);
        }

        #[test]
        fn serde_roundtrip() {
            let oid = ObjectId::new("abc123def4567890abc123def4567890abc12345").unwrap();
            let json = serde_json::to_string(&oid).unwrap();
            assert_eq!(json, "\"abc123def4567890abc123def4567890abc12345\"");
            let parsed: ObjectId = serde_json::from_str(&json).unwrap();
            assert_eq!(oid, parsed);
        }
    }

    mod ref_name {
        use super::*;

        #[test]
        fn valid_refs() {
            for name in [
                "refs/heads/main",
                "refs/tags/v1.0",
                "refs/changes/01/1/1",
                "refs/meta/config",
                "counter",
            ] {
                assert!(RefName::new(name).is_ok(), "{name} should be valid");
            }
        }

        #[test]
        fn git_rules_enforced() {
            for name in [
                "",
                "/refs/heads/main",
                "refs/heads/",
                "refs/heads/main.lock",
                "refs/heads/main.lock/x",
                "refs/heads/bad..name",
                "refs//heads/main",
                "refs/heads/@{1}",
                "has space",
                "has:colon",
                "has*star",
                "tab\there",
            ] {
                assert!(RefName::new(name).is_err(), "{name:?} should be rejected");
            }
        }

        #[test]
        fn hidden_segment_rejected() {
            let err = RefName::new("refs/heads/.data").unwrap_err();
            assert!(err.to_string().contains("'.data'"));
        }

        #[test]
        fn serde_rejects_invalid() {
            assert!(serde_json::from_str::<RefName>("\"refs/heads/a..b\"").is_err());
            let name: RefName = serde_json::from_str("\"refs/heads/main\"").unwrap();
            assert_eq!(name.as_str(), "refs/heads/main");
        }
    }

    mod local_ref {
        use super::*;

        fn name() -> RefName {
            RefName::new("refs/heads/main").unwrap()
        }

        #[test]
        fn null_and_zero_are_deletions() {
            assert!(Ref::new(name(), None).is_deletion());
            assert!(Ref::deleted(name()).is_deletion());
        }

        #[test]
        fn real_id_is_not_deletion() {
            let oid = ObjectId::new("abc123def4567890abc123def4567890abc12345").unwrap();
            let local = Ref::new(name(), Some(oid));
            assert!(!local.is_deletion());
            assert_eq!(local.id_or_zero(), oid);
        }

        #[test]
        fn null_folds_to_zero() {
            assert_eq!(Ref::new(name(), None).id_or_zero(), ObjectId::zero());
        }
    }
}
