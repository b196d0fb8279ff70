pub mod job;
pub mod media;
pub mod playlist;
pub mod status;

pub use job::{FailOutcome, Job, JobKind, JobPayload, JobPayloadError, JobState, JobStats};
pub use media::{
    DedupPolicy, IngestReceipt, MediaDraft, MediaItem, MediaKind, MediaTransition, Reservation,
};
pub use playlist::{positions_are_contiguous, Playlist, PlaylistEntry};
pub use status::{MediaStatus, TransitionError};
