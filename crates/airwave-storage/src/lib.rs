//! Airwave Storage Library
//!
//! Storage abstraction for media artifacts and the local filesystem backend.
//!
//! # Storage key format
//!
//! The media root is partitioned by kind and status:
//!
//! - **Originals**: `{kind}/pending/{media_id}.{ext}`
//! - **Transcoded media**: `{kind}/approved/{media_id}.{mp3|mp4}`
//! - **Thumbnails**: `video/approved/{media_id}.jpg`
//! - **Intro audio**: `intros/{media_id}.mp3`
//! - **Playlist exports**: `playlists/{name}.m3u`
//!
//! Keys must not contain `..` or a leading `/`. Key generation lives in the
//! [`keys`] module so every caller agrees on the layout.

pub mod keys;
pub mod local;
pub mod traits;

pub use local::LocalStorage;
pub use traits::{Storage, StorageError, StorageResult, TempPath};
