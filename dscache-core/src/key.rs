//! Entity keys and their canonical string form.
//!
//! A [`Key`] names one document in the remote store: a kind, an identifier
//! (numeric, string, or not yet assigned), an optional parent key and an
//! optional namespace. The canonical string produced by [`Key::canonical`] is
//! the cache index, so two keys with the same canonical form are the same
//! entity.
//!
//! # Canonical Format
//!
//! ```text
//! ["namespace"]/"ParentKind",<id>/"Kind",<id>
//! ```
//!
//! Kinds, names and namespaces are written as quoted, escaped strings, and
//! numeric ids as bare decimals, so `id 7` and `name "7"` never collide.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

/// Identifier part of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyId {
    /// Pending assignment by the store.
    Incomplete,
    /// Numeric identifier.
    Id(i64),
    /// String identifier.
    Name(String),
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Incomplete => f.write_str("<incomplete>"),
            KeyId::Id(id) => write!(f, "{}", id),
            KeyId::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// Key of a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    kind: String,
    id: KeyId,
    parent: Option<Box<Key>>,
    namespace: Option<String>,
}

impl Key {
    /// A key whose identifier the store assigns on write.
    pub fn incomplete(kind: impl Into<String>, parent: Option<Key>) -> Self {
        Self::build(kind, KeyId::Incomplete, parent)
    }

    /// A key with a numeric identifier.
    pub fn with_id(kind: impl Into<String>, id: i64, parent: Option<Key>) -> Self {
        Self::build(kind, KeyId::Id(id), parent)
    }

    /// A key with a string identifier.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>, parent: Option<Key>) -> Self {
        Self::build(kind, KeyId::Name(name.into()), parent)
    }

    fn build(kind: impl Into<String>, id: KeyId, parent: Option<Key>) -> Self {
        let namespace = parent.as_ref().and_then(|p| p.namespace.clone());
        Self {
            kind: kind.into(),
            id,
            parent: parent.map(Box::new),
            namespace,
        }
    }

    /// Place this key and its ancestors in `namespace`. An empty namespace is
    /// the default one.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.set_namespace((!namespace.is_empty()).then_some(namespace));
        self
    }

    fn set_namespace(&mut self, namespace: Option<String>) {
        if let Some(parent) = self.parent.as_mut() {
            parent.set_namespace(namespace.clone());
        }
        self.namespace = namespace;
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Whether the store has assigned this key an identifier.
    pub fn is_complete(&self) -> bool {
        !matches!(self.id, KeyId::Incomplete)
    }

    /// Copy of this key carrying the numeric identifier `id`.
    pub fn completed(&self, id: i64) -> Key {
        Key {
            id: KeyId::Id(id),
            ..self.clone()
        }
    }

    /// Whether `ancestor` is this key or one of its parents.
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        let mut current = Some(self);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = key.parent();
        }
        false
    }

    /// Canonical string form used as the cache index.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        if let Some(ns) = &self.namespace {
            let _ = write!(out, "{:?}", ns);
        }
        self.write_path(&mut out);
        out
    }

    fn write_path(&self, out: &mut String) {
        if let Some(parent) = &self.parent {
            parent.write_path(out);
        }
        let _ = write!(out, "/{:?},{}", self.kind, self.id);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
