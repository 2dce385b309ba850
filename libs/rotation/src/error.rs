//! Rotation error types.

use thiserror::Error;

/// Errors that can occur when choosing the next active candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RotationError {
    /// There is nobody to rotate through.
    #[error("candidate set is empty")]
    EmptyCandidateSet,
}

/// Errors that can occur when constructing a candidate ID.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty or whitespace.
    #[error("candidate ID cannot be empty")]
    Empty,
}
