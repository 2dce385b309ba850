//! In-memory record store for tests and development.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;
use chrono::Utc;
use rush_rotation::{ActiveMarker, Candidate};
use tracing::debug;

use super::{RecordStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    candidates: Vec<Candidate>,
    active: Option<ActiveMarker>,
}

/// In-memory record store.
///
/// Reads and writes can be made to fail on demand to exercise the cycle's
/// failure handling.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: Mutex<State>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryRecordStore {
    /// Create a store seeded with `candidates` and no active marker.
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            state: Mutex::new(State {
                candidates,
                active: None,
            }),
            ..Self::default()
        }
    }

    /// Seed an existing active marker.
    pub fn with_active(self, marker: ActiveMarker) -> Self {
        self.lock().active = Some(marker);
        self
    }

    /// Replace the candidate set (simulates external edits).
    pub fn set_candidates(&self, candidates: Vec<Candidate>) {
        self.lock().candidates = candidates;
    }

    /// Overwrite the marker out-of-band (simulates a concurrent writer).
    pub fn force_active(&self, marker: Option<ActiveMarker>) {
        self.lock().active = marker;
    }

    /// Make subsequent reads fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current marker.
    pub fn active(&self) -> Option<ActiveMarker> {
        self.lock().active.clone()
    }

    /// Number of successful `set_active` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-write.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store configured to fail reads".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn fetch_candidates(&self) -> StoreResult<Vec<Candidate>> {
        self.check_reads()?;
        Ok(self.lock().candidates.clone())
    }

    async fn fetch_active(&self) -> StoreResult<Option<ActiveMarker>> {
        self.check_reads()?;
        Ok(self.lock().active.clone())
    }

    async fn set_active(
        &self,
        candidate: &Candidate,
        expected_version: u64,
    ) -> StoreResult<ActiveMarker> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store configured to fail writes".to_string(),
            ));
        }

        let mut state = self.lock();
        let actual = ActiveMarker::expected_version(state.active.as_ref());
        if actual != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: Some(actual),
            });
        }

        let marker = ActiveMarker {
            candidate_id: candidate.id.clone(),
            activated_at: Utc::now(),
            version: actual + 1,
        };
        state.active = Some(marker.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);

        debug!(
            candidate_id = %marker.candidate_id,
            version = marker.version,
            "[MEMORY] Active marker written"
        );

        Ok(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, key: i64) -> Candidate {
        Candidate::new(id.parse().unwrap(), id, key)
    }

    #[tokio::test]
    async fn test_set_active_bumps_version() {
        let store = InMemoryRecordStore::new(vec![candidate("a", 1)]);
        let a = candidate("a", 1);

        let first = store.set_active(&a, 0).await.unwrap();
        assert_eq!(first.version, 1);

        let second = store.set_active(&a, 1).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = InMemoryRecordStore::new(vec![candidate("a", 1)]);
        let a = candidate("a", 1);
        store.set_active(&a, 0).await.unwrap();

        let err = store.set_active(&a, 0).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 0,
                actual: Some(1)
            }
        ));
        assert_eq!(store.active().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_failing_reads() {
        let store = InMemoryRecordStore::new(vec![candidate("a", 1)]);
        store.fail_reads(true);
        assert!(matches!(
            store.fetch_candidates().await,
            Err(StoreError::Unavailable(_))
        ));
        store.fail_reads(false);
        assert_eq!(store.fetch_candidates().await.unwrap().len(), 1);
    }
}
