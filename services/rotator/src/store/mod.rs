//! Record store interface.
//!
//! The rotation cycle reads the candidate set and the active marker through
//! this trait and writes the new marker back. Two implementations exist:
//! MongoDB for production and an in-memory store for tests and dry runs.

mod memory;
mod mongo;

use async_trait::async_trait;
use rush_rotation::{ActiveMarker, Candidate};
use thiserror::Error;

pub use memory::InMemoryRecordStore;
pub use mongo::MongoRecordStore;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity, auth or query failure.
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// The active marker moved under us (optimistic concurrency).
    #[error("active marker version conflict: expected {expected}, found {actual:?}")]
    Conflict { expected: u64, actual: Option<u64> },

    /// A stored document did not have the expected shape.
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Candidate and active-marker persistence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch everyone currently eligible for rotation.
    async fn fetch_candidates(&self) -> StoreResult<Vec<Candidate>>;

    /// Fetch the current active marker, if one has ever been written.
    async fn fetch_active(&self) -> StoreResult<Option<ActiveMarker>>;

    /// Mark `candidate` active.
    ///
    /// Succeeds only if the stored marker version still equals
    /// `expected_version` (0 when no marker exists). Returns the new marker.
    async fn set_active(
        &self,
        candidate: &Candidate,
        expected_version: u64,
    ) -> StoreResult<ActiveMarker>;
}
