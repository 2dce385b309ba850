//! Candidate and active-marker types.
//!
//! Candidates are owned by the record store; the rotation only ever reads
//! them. The active marker is the single piece of state a rotation cycle
//! writes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// Opaque identifier of a candidate.
///
/// Ordered lexicographically so it can break ties between equal ordering keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CandidateId(String);

impl CandidateId {
    /// Creates an ID, rejecting empty strings.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(raw))
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CandidateId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CandidateId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CandidateId> for String {
    fn from(id: CandidateId) -> Self {
        id.0
    }
}

/// Display-only data attached to a candidate.
///
/// None of these fields influence rotation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateDetails {
    /// When the candidate checked in.
    pub check_in: Option<DateTime<Utc>>,

    /// When the candidate checked out, if they have.
    pub check_out: Option<DateTime<Utc>>,

    /// Mean survey fit rating; `None` when no surveys exist.
    pub mean_fit_rating: Option<f64>,

    /// Survey bid-status tallies.
    pub bids: BidTally,

    /// Lower-cased, de-duplicated, sorted recommender names.
    pub brother_recs: Vec<String>,

    /// Lower-cased, de-duplicated, sorted interest tags.
    pub interests: Vec<String>,
}

/// Counts of survey bid statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidTally {
    pub reds: u32,
    pub greens: u32,
    pub pro: u32,
    pub con: u32,
}

/// An entity eligible to be the active selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique identifier.
    pub id: CandidateId,

    /// Display label.
    pub name: String,

    /// Rotation order key (lower rotates first).
    pub ordering_key: i64,

    /// Display-only details.
    #[serde(default)]
    pub details: CandidateDetails,
}

impl Candidate {
    /// Create a candidate with empty details.
    pub fn new(id: CandidateId, name: impl Into<String>, ordering_key: i64) -> Self {
        Self {
            id,
            name: name.into(),
            ordering_key,
            details: CandidateDetails::default(),
        }
    }

    /// Attach display details.
    pub fn with_details(mut self, details: CandidateDetails) -> Self {
        self.details = details;
        self
    }

    /// The total-order key: ordering key first, then ID.
    pub(crate) fn sort_key(&self) -> (i64, &CandidateId) {
        (self.ordering_key, &self.id)
    }
}

/// The record identifying which candidate currently holds active status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMarker {
    /// The active candidate.
    pub candidate_id: CandidateId,

    /// When the candidate became active.
    pub activated_at: DateTime<Utc>,

    /// Monotonic write version; bumped on every successful write.
    pub version: u64,
}

impl ActiveMarker {
    /// Version expected by the next write when no marker exists yet.
    pub const BOOTSTRAP_VERSION: u64 = 0;

    /// Returns the version a writer must present to replace `marker`.
    pub fn expected_version(marker: Option<&ActiveMarker>) -> u64 {
        marker.map_or(Self::BOOTSTRAP_VERSION, |m| m.version)
    }
}
