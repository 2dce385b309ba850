//! Rush rotator.
//!
//! Periodically picks the next active rush candidate from MongoDB, persists
//! the choice, and mirrors the full roster into a Google spreadsheet.

pub mod config;
pub mod cycle;
pub mod sheets;
pub mod store;
pub mod worker;

pub use config::{Config, ConfigError};
pub use cycle::{CycleError, CyclePhase, CycleReport, RotationCycle};
pub use sheets::{PublishError, SheetPublisher, SheetRow};
pub use store::{RecordStore, StoreError};
pub use worker::{RotationWorker, WorkerStats};
