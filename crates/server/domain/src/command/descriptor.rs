//! Persisted type identifiers.
//!
//! A descriptor is the string stored next to a serialized payload so the
//! payload can be decoded again later, possibly by another process. It is the
//! module path of the type, with no dependency on the binary that produced it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeDescriptor(String);

pub type CommandTypeDescriptor = TypeDescriptor;
pub type EventTypeDescriptor = TypeDescriptor;

impl TypeDescriptor {
    /// Descriptor derived from the Rust type path of `T`.
    ///
    /// `type_name` output is not stable across compiler versions; prefer
    /// [`from_identifier`](Self::from_identifier) for anything persisted long term.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    /// Rebuilds a descriptor from its persisted form.
    pub fn from_identifier(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn identifier(&self) -> &str {
        &self.0
    }

    /// Literal identity. A handler registered for a "parent" command never
    /// matches a command that merely embeds or wraps it.
    pub fn is_exact_type_match(&self, other: &TypeDescriptor) -> bool {
        self.0 == other.0
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
