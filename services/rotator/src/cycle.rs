//! One rotation cycle: fetch → compute → persist → publish.
//!
//! The cycle is the unit of failure. Any error abandons the rest of the cycle
//! and is reported with the phase it happened in; the caller decides what to
//! do next (the worker just waits for the next period).

use std::{fmt, sync::Arc, time::Duration};

use rush_rotation::{rotate, ActiveMarker, CandidateId, RotationError};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::sheets::{build_rows, PublishError, SheetPublisher};
use crate::store::{RecordStore, StoreError};

/// Where a cycle is (or was when it failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Computing,
    Persisting,
    Publishing,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Computing => "computing",
            Self::Persisting => "persisting",
            Self::Publishing => "publishing",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-cycle failures. None of these stop the worker.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The record store could not be read or written.
    #[error("record store unavailable while {phase}: {source}")]
    StoreUnavailable {
        phase: CyclePhase,
        #[source]
        source: StoreError,
    },

    /// Another writer moved the active marker between our read and write.
    #[error("active marker changed concurrently: {0}")]
    StoreConflict(#[source] StoreError),

    /// The sheet could not be updated. The marker is already persisted.
    #[error("sheet publish failed: {0}")]
    PublishUnavailable(#[source] PublishError),

    /// Nobody to rotate through.
    #[error("no candidates to rotate")]
    EmptyCandidateSet,
}

impl CycleError {
    /// The phase in which the cycle was abandoned.
    pub fn phase(&self) -> CyclePhase {
        match self {
            Self::StoreUnavailable { phase, .. } => *phase,
            Self::StoreConflict(_) => CyclePhase::Persisting,
            Self::PublishUnavailable(_) => CyclePhase::Publishing,
            Self::EmptyCandidateSet => CyclePhase::Computing,
        }
    }

    fn from_store(phase: CyclePhase, err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => Self::StoreConflict(err),
            other => Self::StoreUnavailable {
                phase,
                source: other,
            },
        }
    }
}

impl From<RotationError> for CycleError {
    fn from(err: RotationError) -> Self {
        match err {
            RotationError::EmptyCandidateSet => Self::EmptyCandidateSet,
        }
    }
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub previous_active: Option<CandidateId>,
    pub next_active: CandidateId,
    pub candidate_count: usize,
    pub rows_published: usize,
    pub marker_version: u64,
    pub elapsed: Duration,
}

/// Drives a single rotation against a record store and a sheet publisher.
#[derive(Clone)]
pub struct RotationCycle {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn SheetPublisher>,
}

impl RotationCycle {
    pub fn new(store: Arc<dyn RecordStore>, publisher: Arc<dyn SheetPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Run one cycle to completion or first failure.
    pub async fn run(&self, cycle: u64) -> Result<CycleReport, CycleError> {
        let started = Instant::now();

        enter(cycle, CyclePhase::Fetching);
        let candidates = self
            .store
            .fetch_candidates()
            .await
            .map_err(|e| CycleError::from_store(CyclePhase::Fetching, e))?;
        let current = self
            .store
            .fetch_active()
            .await
            .map_err(|e| CycleError::from_store(CyclePhase::Fetching, e))?;

        enter(cycle, CyclePhase::Computing);
        let previous_active = current.as_ref().map(|m| m.candidate_id.clone());
        let next = rotate(&candidates, previous_active.as_ref())?;

        enter(cycle, CyclePhase::Persisting);
        let marker = self
            .store
            .set_active(next, ActiveMarker::expected_version(current.as_ref()))
            .await
            .map_err(|e| CycleError::from_store(CyclePhase::Persisting, e))?;

        enter(cycle, CyclePhase::Publishing);
        let rows = build_rows(&candidates, Some(&marker.candidate_id));
        self.publisher
            .publish(&rows)
            .await
            .map_err(CycleError::PublishUnavailable)?;

        enter(cycle, CyclePhase::Idle);
        Ok(CycleReport {
            cycle,
            previous_active,
            next_active: marker.candidate_id,
            candidate_count: candidates.len(),
            rows_published: rows.len(),
            marker_version: marker.version,
            elapsed: started.elapsed(),
        })
    }
}

fn enter(cycle: u64, phase: CyclePhase) {
    debug!(cycle, phase = %phase, "Rotation cycle phase");
}
