//! Airwave persistence layer
//!
//! SQLite-backed repositories for the dedup index and media lifecycle, the
//! durable job queue, and playlist queues.

pub mod db;

pub use db::{
    connect, connect_in_memory, run_migrations, JobRepository, MediaRepository,
    PlaylistRepository,
};
