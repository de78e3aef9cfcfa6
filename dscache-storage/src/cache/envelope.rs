//! Serialized form of a cache entry.
//!
//! Every cached value travels inside an envelope that records the schema tag
//! of the entity written, so a read into a different type is caught before
//! anything is decoded into the caller's destination.

use chrono::{DateTime, Utc};
use dscache_core::{CacheError, Entity, PropertyList, RecordError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache entry payload: schema tag, write time and the record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    /// `Entity::kind()` of the value written.
    pub kind: String,
    /// When the entry was written to the cache.
    pub cached_at: DateTime<Utc>,
    /// The record.
    pub data: PropertyList,
}

impl CacheEnvelope {
    /// Wrap `entity`. Fails if it does not serialize to a record.
    pub fn wrap<T: Entity>(entity: &T) -> Result<Self, RecordError> {
        Ok(Self {
            kind: T::kind().to_string(),
            cached_at: Utc::now(),
            data: PropertyList::from_entity(entity)?,
        })
    }

    /// Encode to the bytes handed to a cache backend.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Decode bytes read from a cache backend.
    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    /// Whether this entry holds a `T`.
    pub fn matches<T: Entity>(&self) -> bool {
        self.kind == T::kind()
    }

    /// Decode the record into `T`. Callers check [`matches`](Self::matches)
    /// first.
    pub fn into_entity<T: Entity>(self) -> Result<T, CacheError> {
        self.data
            .into_entity()
            .map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    /// Time since the entry was written.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
