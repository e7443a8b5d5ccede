//! Storage abstraction layer for the FHIR server (C6, §4.6).
//!
//! Defines the [`FhirStorage`] trait every backend implements (CRUD,
//! versioning, search, transactions) plus an in-memory backend for tests
//! and local development. `octofhir-db-postgres` provides the production
//! backend against the same trait.

mod error;
mod memory;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use memory::MemoryStorage;
pub use traits::{FhirStorage, StorageCapabilities, Transaction};
pub use types::{
    HistoryEntry, HistoryMethod, HistoryParams, HistoryResult, SearchParams, SearchResult,
    SortParam, TotalMode,
};

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A shared, dynamically-dispatched storage backend.
pub type DynStorage = std::sync::Arc<dyn FhirStorage>;

pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::memory::MemoryStorage;
    pub use crate::traits::{FhirStorage, StorageCapabilities, Transaction};
    pub use crate::types::{
        HistoryEntry, HistoryMethod, HistoryParams, HistoryResult, SearchParams, SearchResult,
        SortParam, TotalMode,
    };
    pub use crate::{DynStorage, StorageResult};
}
