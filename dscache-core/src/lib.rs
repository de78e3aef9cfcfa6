//! dscache Core - Data Types
//!
//! Keys, entity records, queries, errors and configuration shared by the
//! store adapters, the cache backends and the caching client. This crate
//! contains ONLY data types - no I/O.

pub mod config;
pub mod entity;
pub mod error;
pub mod key;
pub mod query;

pub use config::{default_project_id, DscacheConfig, DEFAULT_CACHE_TIMEOUT, DEFAULT_MAX_CACHE_SIZE};
pub use entity::{Entity, PropertyList};
pub use error::{
    CacheError, CacheResult, ConfigError, DscacheError, DscacheResult, MultiError, RecordError,
    StoreError, StoreResult,
};
pub use key::{Key, KeyId};
pub use query::{Query, QueryResult};
