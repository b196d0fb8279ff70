//! Database repositories for data access layer
//!
//! Each repository owns one table family. Writers that need a single-writer
//! critical section go through [`transaction::ImmediateTransaction`].

pub mod job;
pub mod media;
pub mod playlist;
pub mod pool;
pub mod transaction;

pub use job::JobRepository;
pub use media::MediaRepository;
pub use playlist::PlaylistRepository;
pub use pool::{connect, connect_in_memory, run_migrations};
