//! Airwave Services Layer
//!
//! Orchestration on top of the repositories, storage and processing crates:
//! upload intake, the transcode and intro job handlers, playlist scheduling,
//! the retention sweeper, operator lifecycle actions and the health report.
//! [`AppState`] wires them together and is the job handler context the worker
//! pool dispatches to.

pub mod health;
pub mod ingest;
pub mod lifecycle;
pub mod pipeline;
pub mod playlist;
pub mod state;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use health::{HealthReport, HealthService, HealthStatus};
pub use ingest::{IngestService, UploadMetadata};
pub use lifecycle::{LifecycleService, MediaReport};
pub use pipeline::{IntroHandler, JobHandler, TranscodeHandler};
pub use playlist::{PlaylistService, QueueItem};
pub use state::{AppState, Components};
pub use sweeper::{RetentionSweeper, SweepReport};
