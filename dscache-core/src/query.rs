//! Store queries and their results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Entity, PropertyList};
use crate::error::{StoreError, StoreResult};
use crate::key::Key;

/// Description of a store query. Built with the `with_*`/`filter_eq` methods
/// and handed to the store unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    kind: Option<String>,
    keys_only: bool,
    limit: Option<usize>,
    offset: usize,
    namespace: Option<String>,
    ancestor: Option<Key>,
    filters: Vec<(String, Value)>,
}

impl Query {
    /// Query over every entity of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    /// Query over entities of every kind.
    pub fn kindless() -> Self {
        Self::default()
    }

    /// Return keys without records.
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    /// Restrict results to `ancestor` and its descendants.
    pub fn with_ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Require `property` to equal `value`.
    pub fn filter_eq(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((property.into(), value.into()));
        self
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn ancestor(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    pub fn filters(&self) -> &[(String, Value)] {
        &self.filters
    }

    /// Whether `key`/`record` satisfies every constraint except limit and offset.
    pub fn matches(&self, key: &Key, record: &PropertyList) -> bool {
        if let Some(kind) = &self.kind {
            if key.kind() != kind {
                return false;
            }
        }
        if key.namespace() != self.namespace.as_deref() {
            return false;
        }
        if let Some(ancestor) = &self.ancestor {
            if !key.has_ancestor(ancestor) {
                return false;
            }
        }
        self.filters
            .iter()
            .all(|(property, value)| record.get(property) == Some(value))
    }
}

/// One item yielded by a query iterator.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub key: Key,
    /// `None` for keys-only queries.
    pub record: Option<PropertyList>,
}

impl QueryResult {
    /// Decode the record into `T`.
    pub fn decode<T: Entity>(&self) -> StoreResult<T> {
        let record = self.record.clone().ok_or_else(|| StoreError::Rejected {
            operation: "decode".to_string(),
            reason: format!("keys-only result for {} has no record", self.key),
        })?;
        Ok(record.into_entity()?)
    }
}
