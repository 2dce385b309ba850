//! Recording publisher for tests and dry runs.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;
use tracing::debug;

use super::{PublishError, SheetPublisher, SheetRow};

/// Keeps the last published row set in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Option<Vec<SheetRow>>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail with `PublishError::Unavailable`.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Rows from the last successful publish.
    pub fn published(&self) -> Option<Vec<SheetRow>> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of publish calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SheetPublisher for RecordingPublisher {
    async fn publish(&self, rows: &[SheetRow]) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable(
                "recording publisher configured to fail".to_string(),
            ));
        }

        debug!(row_count = rows.len(), "[MEMORY] Rows published");
        *self.published.lock().unwrap_or_else(|e| e.into_inner()) = Some(rows.to_vec());
        Ok(())
    }
}
