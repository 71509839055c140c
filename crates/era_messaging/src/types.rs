//! # Core Type Definitions
//!
//! Identifiers and binding declarations shared by the bus, the stores and
//! the attribute binder.
//!
//! ## Key Types
//!
//! - [`ObjectId`] - Runtime identity of a host object
//! - [`HandlerId`] - Identity of a subscribed event handler
//! - [`CellId`] - Identity of an observable value cell
//! - [`BindingMode`] / [`BindingDecl`] - How a declared name is resolved

use compact_str::{format_compact, CompactString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a host object instance.
///
/// Instance-scoped bindings use it as the prefix of the resolved name, so
/// every instance gets its own private channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    /// Creates a new random object ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an object ID from its string form.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a subscribed handler.
///
/// Closures cannot be compared, so `subscribe` hands out an ID and
/// `unsubscribe` removes by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerId(pub Uuid);

impl HandlerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an observable value cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(pub Uuid);

impl CellId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a declared event or request name becomes the resolved bus/store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingMode {
    /// The bare name, shared by every instance of every type
    Global,
    /// The name prefixed by a fixed identifier: `"{scope}.{name}"`
    TypeScoped(CompactString),
    /// The name prefixed by the owning object's identity: `"{id}.{name}"`
    InstanceScoped,
}

/// A single binding declaration on a method or field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingDecl {
    pub mode: BindingMode,
    pub name: CompactString,
}

impl BindingDecl {
    /// Declaration resolving to the bare name.
    pub fn global(name: &str) -> Self {
        Self {
            mode: BindingMode::Global,
            name: CompactString::new(name),
        }
    }

    /// Declaration resolving to `"{scope}.{name}"`.
    pub fn scoped(scope: &str, name: &str) -> Self {
        Self {
            mode: BindingMode::TypeScoped(CompactString::new(scope)),
            name: CompactString::new(name),
        }
    }

    /// Declaration resolving to `"{owner id}.{name}"`.
    pub fn instance(name: &str) -> Self {
        Self {
            mode: BindingMode::InstanceScoped,
            name: CompactString::new(name),
        }
    }

    /// Resolves the key used on the bus or in a store for the given owner.
    pub fn resolve(&self, owner: ObjectId) -> CompactString {
        match &self.mode {
            BindingMode::Global => self.name.clone(),
            BindingMode::TypeScoped(scope) if scope.is_empty() => self.name.clone(),
            BindingMode::TypeScoped(scope) => format_compact!("{}.{}", scope, self.name),
            BindingMode::InstanceScoped => format_compact!("{}.{}", owner, self.name),
        }
    }
}

impl std::fmt::Display for BindingDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.mode {
            BindingMode::Global => write!(f, "{}", self.name),
            BindingMode::TypeScoped(scope) => write!(f, "{}.{}", scope, self.name),
            BindingMode::InstanceScoped => write!(f, "<instance>.{}", self.name),
        }
    }
}
