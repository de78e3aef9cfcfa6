//! Error types for dscache operations

use std::fmt;
use thiserror::Error;

/// Errors raised while converting between entities and stored records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("{kind} does not serialize to a structured record (got {found})")]
    NotARecord {
        kind: &'static str,
        found: &'static str,
    },

    #[error("Failed to encode {kind}: {reason}")]
    Encode { kind: &'static str, reason: String },

    #[error("Failed to decode {kind}: {reason}")]
    Decode { kind: &'static str, reason: String },
}

/// Errors reported by a remote store adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("No such entity: {key}")]
    NotFound { key: String },

    #[error(transparent)]
    Multi(MultiError),

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("Record codec error: {0}")]
    Codec(#[from] RecordError),
}

impl StoreError {
    /// Whether this error means the entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Per-item outcome of a batched store operation.
///
/// Slot `i` holds the error for the `i`-th requested key, or `None` when that
/// item succeeded. Callers still receive every item that did resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiError(Vec<Option<StoreError>>);

impl MultiError {
    /// Create an aggregate with `len` empty slots.
    pub fn with_len(len: usize) -> Self {
        Self(vec![None; len])
    }

    /// Wrap an existing per-item error list.
    pub fn new(errors: Vec<Option<StoreError>>) -> Self {
        Self(errors)
    }

    /// Record the error for position `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, error: StoreError) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = Some(error);
        }
    }

    /// Error at position `index`, if that item failed.
    pub fn get(&self, index: usize) -> Option<&StoreError> {
        self.0.get(index).and_then(Option::as_ref)
    }

    /// Number of slots (equals the number of requested items).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any item failed.
    pub fn has_failures(&self) -> bool {
        self.0.iter().any(Option::is_some)
    }

    /// Iterate over `(position, error)` for every failed item.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &StoreError)> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    /// Positions whose error is a not-found signal.
    pub fn not_found_positions(&self) -> Vec<usize> {
        self.failures()
            .filter(|(_, e)| e.is_not_found())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn into_inner(self) -> Vec<Option<StoreError>> {
        self.0
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failures = self.failures();
        match failures.next() {
            None => write!(f, "0 of {} items failed", self.len()),
            Some((index, first)) => {
                let others = failures.count();
                write!(f, "item {}: {}", index, first)?;
                if others > 0 {
                    write!(f, " (and {} other errors)", others)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}

/// Errors reported by a cache backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type returned by the caching client.
#[derive(Debug, Clone, Error)]
pub enum DscacheError {
    #[error("Invalid argument to {operation}: {reason}")]
    InvalidArgument {
        operation: &'static str,
        reason: String,
    },

    #[error("Cached entity at {key} is a {cached}, cannot load it into a {requested}")]
    TypeMismatch {
        key: String,
        cached: String,
        requested: &'static str,
    },

    #[error("Entity not found: {key}")]
    NotFound { key: String },

    #[error("Store error during {operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Cache error in {backend} during {operation}: {source}")]
    Cache {
        backend: &'static str,
        operation: &'static str,
        #[source]
        source: CacheError,
    },

    #[error("Batch partially failed: {0}")]
    Multi(MultiError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl DscacheError {
    pub fn invalid_argument(operation: &'static str, reason: impl Into<String>) -> Self {
        DscacheError::InvalidArgument {
            operation,
            reason: reason.into(),
        }
    }

    /// Attribute a store failure to `operation`. Not-found and per-item batch
    /// errors keep their own variants.
    pub fn from_store(operation: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::NotFound { key } => DscacheError::NotFound { key },
            StoreError::Multi(errors) => DscacheError::Multi(errors),
            source => DscacheError::Store { operation, source },
        }
    }

    pub fn from_cache(backend: &'static str, operation: &'static str, source: CacheError) -> Self {
        DscacheError::Cache {
            backend,
            operation,
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DscacheError::NotFound { .. })
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, DscacheError::TypeMismatch { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, DscacheError::InvalidArgument { .. })
    }
}

/// Result type alias for caching-client operations.
pub type DscacheResult<T> = Result<T, DscacheError>;

/// Result type alias for remote store adapters.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for cache backends.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
