//! core::codec
//!
//! Typed value codecs for payloads stored in the coordination service.
//!
//! # Design
//!
//! Every storable type implements [`RefValue`], which ties the type to an
//! explicit [`ValueKind`] descriptor and a text encoding. A
//! [`CodecRegistry`] is assembled once at startup and decides which types the
//! process accepts. Each kind belongs to exactly one Rust type: registering a
//! second type under a taken kind fails with [`CodecError::Conflict`], and a
//! lookup only succeeds for the exact type that was registered. Anything else
//! fails closed with [`CodecError::NotFound`]. The registry hands back a typed
//! [`Codec<T>`] directly, so no runtime casts are involved.
//!
//! # Wire encoding
//!
//! | Kind       | Text form                 |
//! |------------|---------------------------|
//! | `Int32`    | decimal                   |
//! | `Int64`    | decimal                   |
//! | `ObjectId` | 40 hex characters         |
//! | `Text`     | raw text, passed through  |
//!
//! # Example
//!
//! ```
//! use refcoord::core::codec::CodecRegistry;
//!
//! let registry = CodecRegistry::builtin();
//! let codec = registry.resolve::<i64>().unwrap();
//!
//! let bytes = codec.encode(&42);
//! assert_eq!(bytes, b"42");
//! assert_eq!(codec.decode(&bytes).unwrap(), 42);
//! ```

use std::any::{type_name, TypeId};
use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::types::ObjectId;

/// Explicit type descriptor used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Int32,
    Int64,
    ObjectId,
    Text,
    /// Application-defined kind, identified by a stable name.
    Custom(&'static str),
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Int32 => write!(f, "int32"),
            ValueKind::Int64 => write!(f, "int64"),
            ValueKind::ObjectId => write!(f, "object-id"),
            ValueKind::Text => write!(f, "text"),
            ValueKind::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Errors from codec resolution and decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No codec registered for the requested kind.
    #[error("no codec registered for {kind}")]
    NotFound { kind: ValueKind },

    /// The stored text is not a valid encoding of the kind.
    #[error("cannot decode {kind} from '{text}': {reason}")]
    Malformed {
        kind: ValueKind,
        text: String,
        reason: String,
    },

    /// A different type already owns the kind.
    #[error("cannot register {type_name} as {kind}: kind belongs to another type")]
    Conflict {
        kind: ValueKind,
        type_name: &'static str,
    },

    /// The stored bytes are not text.
    #[error("stored bytes for {kind} are not valid UTF-8")]
    NotText { kind: ValueKind },
}

/// A type that can be stored and compared through the coordination service.
pub trait RefValue: Sized + 'static {
    /// Registry key for this type.
    const KIND: ValueKind;

    /// Text form written to the service.
    fn encode(&self) -> String;

    /// Parse the text form back into a value.
    fn decode(text: &str) -> Result<Self, CodecError>;
}

fn malformed(kind: ValueKind, text: &str, reason: impl ToString) -> CodecError {
    CodecError::Malformed {
        kind,
        text: text.to_string(),
        reason: reason.to_string(),
    }
}

impl RefValue for i32 {
    const KIND: ValueKind = ValueKind::Int32;

    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(text: &str) -> Result<Self, CodecError> {
        text.parse().map_err(|e| malformed(Self::KIND, text, e))
    }
}

impl RefValue for i64 {
    const KIND: ValueKind = ValueKind::Int64;

    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(text: &str) -> Result<Self, CodecError> {
        text.parse().map_err(|e| malformed(Self::KIND, text, e))
    }
}

impl RefValue for ObjectId {
    const KIND: ValueKind = ValueKind::ObjectId;

    fn encode(&self) -> String {
        self.to_hex()
    }

    fn decode(text: &str) -> Result<Self, CodecError> {
        ObjectId::new(text).map_err(|e| malformed(Self::KIND, text, e))
    }
}

impl RefValue for String {
    const KIND: ValueKind = ValueKind::Text;

    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(text: &str) -> Result<Self, CodecError> {
        Ok(text.to_string())
    }
}

/// Encode/decode pair for one value type.
pub struct Codec<T> {
    kind: ValueKind,
    encode: fn(&T) -> String,
    decode: fn(&str) -> Result<T, CodecError>,
}

impl<T: RefValue> Codec<T> {
    fn of() -> Self {
        Self {
            kind: T::KIND,
            encode: T::encode,
            decode: T::decode,
        }
    }
}

impl<T> Codec<T> {
    /// Descriptor this codec was resolved for.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Encode a value to its wire bytes.
    pub fn encode(&self, value: &T) -> Vec<u8> {
        (self.encode)(value).into_bytes()
    }

    /// Decode wire bytes into a value.
    pub fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let text =
            std::str::from_utf8(bytes).map_err(|_| CodecError::NotText { kind: self.kind })?;
        (self.decode)(text)
    }
}

impl<T> Clone for Codec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Codec<T> {}

impl<T> std::fmt::Debug for Codec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").field("kind", &self.kind).finish()
    }
}

/// Type that owns a built-in kind; custom kinds have no fixed owner.
fn builtin_owner(kind: ValueKind) -> Option<TypeId> {
    match kind {
        ValueKind::Int32 => Some(TypeId::of::<i32>()),
        ValueKind::Int64 => Some(TypeId::of::<i64>()),
        ValueKind::ObjectId => Some(TypeId::of::<ObjectId>()),
        ValueKind::Text => Some(TypeId::of::<String>()),
        ValueKind::Custom(_) => None,
    }
}

/// Value types this process accepts, keyed by kind.
///
/// Built once at startup and read-only afterwards; safe to share across
/// threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecRegistry {
    kinds: BTreeMap<ValueKind, TypeId>,
}

impl CodecRegistry {
    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with the built-in integer, object-id and text codecs.
    pub fn builtin() -> Self {
        Self::empty()
            .with_builtin::<i32>()
            .with_builtin::<i64>()
            .with_builtin::<ObjectId>()
            .with_builtin::<String>()
    }

    /// Add a built-in type. Built-in kinds can only ever map to their own
    /// type, so this cannot conflict.
    pub(crate) fn with_builtin<T: RefValue>(mut self) -> Self {
        self.kinds.insert(T::KIND, TypeId::of::<T>());
        self
    }

    /// Register the codec for `T`.
    ///
    /// Registering the same type twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`CodecError::Conflict`] if `T::KIND` is a built-in kind of another
    /// type, or a custom name already registered by another type.
    pub fn register<T: RefValue>(mut self) -> Result<Self, CodecError> {
        let id = TypeId::of::<T>();
        let owner = builtin_owner(T::KIND).or_else(|| self.kinds.get(&T::KIND).copied());
        if owner.is_some_and(|owner| owner != id) {
            return Err(CodecError::Conflict {
                kind: T::KIND,
                type_name: type_name::<T>(),
            });
        }
        self.kinds.insert(T::KIND, id);
        Ok(self)
    }

    /// Check whether a kind is registered.
    pub fn contains(&self, kind: ValueKind) -> bool {
        self.kinds.contains_key(&kind)
    }

    /// Registered kinds in a stable order.
    pub fn kinds(&self) -> impl Iterator<Item = ValueKind> + '_ {
        self.kinds.keys().copied()
    }

    /// Look up the codec for `T`.
    ///
    /// # Errors
    ///
    /// [`CodecError::NotFound`] unless `T` itself was registered.
    pub fn resolve<T: RefValue>(&self) -> Result<Codec<T>, CodecError> {
        match self.kinds.get(&T::KIND) {
            Some(id) if *id == TypeId::of::<T>() => Ok(Codec::of()),
            _ => Err(CodecError::NotFound { kind: T::KIND }),
        }
    }
}
