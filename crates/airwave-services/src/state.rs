//! Shared service state.

use sqlx::SqlitePool;
use std::sync::{Arc, Weak};

use airwave_core::AirwaveConfig;
use airwave_db::{JobRepository, MediaRepository, PlaylistRepository};
use airwave_processing::{IngestValidator, MediaTranscoder, NarrationClient};
use airwave_storage::Storage;
use airwave_worker::{Dispatcher, JobHandlerContext, JobQueue, JobQueueConfig};

use crate::health::HealthService;
use crate::ingest::IngestService;
use crate::lifecycle::LifecycleService;
use crate::playlist::PlaylistService;
use crate::sweeper::RetentionSweeper;

/// Everything [`AppState`] is built from.
pub struct Components {
    pub settings: AirwaveConfig,
    pub pool: SqlitePool,
    pub storage: Arc<dyn Storage>,
    pub transcoder: Arc<dyn MediaTranscoder>,
    pub narration: Arc<dyn NarrationClient>,
}

pub struct AppState {
    pub settings: AirwaveConfig,
    pub pool: SqlitePool,
    pub media: MediaRepository,
    pub jobs: JobRepository,
    pub playlists: PlaylistRepository,
    pub storage: Arc<dyn Storage>,
    pub transcoder: Arc<dyn MediaTranscoder>,
    pub narration: Arc<dyn NarrationClient>,
    pub queue: Arc<JobQueue>,
}

impl AppState {
    /// Build the state and start the worker pool that dispatches back into it.
    pub fn with_workers(components: Components, queue_config: JobQueueConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<AppState>| {
            let context: Weak<dyn JobHandlerContext> = weak.clone();
            let queue = JobQueue::start(
                JobRepository::new(components.pool.clone()),
                queue_config,
                context,
            );
            Self::assemble(components, queue)
        })
    }

    /// Build the state with a submit-only queue. Jobs are persisted and left
    /// for a running worker pool, or for [`AppState::inline_dispatcher`].
    pub fn without_workers(components: Components, queue_config: JobQueueConfig) -> Arc<Self> {
        let queue = JobQueue::new_no_worker(JobRepository::new(components.pool.clone()), queue_config);
        Arc::new(Self::assemble(components, queue))
    }

    fn assemble(components: Components, queue: JobQueue) -> Self {
        let Components {
            settings,
            pool,
            storage,
            transcoder,
            narration,
        } = components;

        Self {
            settings,
            media: MediaRepository::new(pool.clone()),
            jobs: JobRepository::new(pool.clone()),
            playlists: PlaylistRepository::new(pool.clone()),
            pool,
            storage,
            transcoder,
            narration,
            queue: Arc::new(queue),
        }
    }

    /// A dispatcher bound to this state, for running queued jobs on the
    /// caller's task instead of the worker pool.
    pub fn inline_dispatcher(self: &Arc<Self>) -> Dispatcher {
        let context: Arc<dyn JobHandlerContext> = self.clone();
        Dispatcher::new(
            self.jobs.clone(),
            self.queue.dispatcher().config().clone(),
            Arc::downgrade(&context),
        )
    }

    pub fn ingest(&self) -> IngestService {
        IngestService::new(
            self.media.clone(),
            self.storage.clone(),
            IngestValidator::new(self.settings.max_upload_size_bytes),
            self.settings.dedup_policy,
            self.queue.clone(),
        )
    }

    pub fn lifecycle(&self) -> LifecycleService {
        LifecycleService::new(
            self.media.clone(),
            self.jobs.clone(),
            self.storage.clone(),
            IngestValidator::new(self.settings.max_upload_size_bytes),
            self.queue.clone(),
        )
    }

    pub fn scheduler(&self) -> PlaylistService {
        PlaylistService::new(
            self.playlists.clone(),
            self.media.clone(),
            self.storage.clone(),
            self.narration.clone(),
            self.settings.daily_playlist_slots,
            self.settings.daily_audio_share,
        )
    }

    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(
            self.media.clone(),
            self.jobs.clone(),
            self.playlists.clone(),
            self.storage.clone(),
            &self.settings,
        )
    }

    pub fn health(&self) -> HealthService {
        HealthService::new(
            self.pool.clone(),
            self.storage.clone(),
            self.transcoder.clone(),
            self.narration.clone(),
            self.settings.media_root.clone(),
        )
    }
}
