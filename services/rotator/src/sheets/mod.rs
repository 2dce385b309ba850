//! Sheet publisher interface.
//!
//! A publish replaces the data sheet's contents with the given rows. Rows are
//! derived state, so a failed publish is simply repeated by the next cycle.

mod auth;
mod google;
mod memory;
mod rows;

use async_trait::async_trait;
use thiserror::Error;

pub use auth::{AccessTokenSource, ServiceAccountKey, ServiceAccountTokenSource, StaticToken};
pub use google::GoogleSheetsPublisher;
pub use memory::RecordingPublisher;
pub use rows::{build_rows, SheetRow, ACTIVE_LABEL, HEADER};

/// Sheet publishing errors.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Network failure or unexpected API status.
    #[error("sheets API unavailable: {0}")]
    Unavailable(String),

    /// The API asked us to back off.
    #[error("rate limited by sheets API (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Credentials were rejected or could not be minted.
    #[error("sheets API authentication failed: {0}")]
    Auth(String),

    /// The API answered with something we could not interpret.
    #[error("unexpected sheets API response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Writes the rotation view to an external spreadsheet.
#[async_trait]
pub trait SheetPublisher: Send + Sync {
    /// Replace the published rows with the header and `rows`.
    async fn publish(&self, rows: &[SheetRow]) -> Result<(), PublishError>;
}
