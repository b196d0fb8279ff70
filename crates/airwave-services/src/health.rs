//! Health report for the pipeline's dependencies.
//!
//! Each check runs under its own timeout and reports "healthy", "timeout" or
//! an error string. The database and the ffmpeg tools are required; the
//! narration service and free disk space only degrade the station.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Disks;

use airwave_processing::{MediaTranscoder, NarrationClient};
use airwave_storage::Storage;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Share of the media disk in use at which the report turns degraded.
pub const DISK_WARNING_RATIO: f64 = 0.9;

const HEALTHY: &str = "healthy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub database: String,
    pub storage: String,
    pub tools: String,
    pub narration: String,
    /// `None` when no mounted disk could be matched to the media root.
    pub disk: Option<DiskUsage>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    fn overall(&self) -> HealthStatus {
        if self.database != HEALTHY || self.storage != HEALTHY || self.tools != HEALTHY {
            return HealthStatus::Unhealthy;
        }
        let disk_low = self
            .disk
            .as_ref()
            .is_some_and(|disk| disk.used_ratio >= DISK_WARNING_RATIO);
        if self.narration != HEALTHY || disk_low {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }
}

async fn run_check<F, E>(f: F, error_prefix: &str) -> String
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(CHECK_TIMEOUT, f).await {
        Ok(Ok(())) => HEALTHY.to_string(),
        Ok(Err(e)) => format!("{}: {}", error_prefix, e),
        Err(_) => "timeout".to_string(),
    }
}

/// Usage of the mounted disk holding `path`: the mount point that is the
/// longest prefix of the canonical path.
fn disk_usage(path: &Path) -> Option<DiskUsage> {
    let canonical = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .iter()
        .filter(|disk| canonical.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().components().count())?;

    let total_bytes = disk.total_space();
    if total_bytes == 0 {
        return None;
    }
    let available_bytes = disk.available_space();
    Some(DiskUsage {
        mount_point: disk.mount_point().to_path_buf(),
        total_bytes,
        available_bytes,
        used_ratio: 1.0 - available_bytes as f64 / total_bytes as f64,
    })
}

#[derive(Clone)]
pub struct HealthService {
    pool: SqlitePool,
    storage: Arc<dyn Storage>,
    transcoder: Arc<dyn MediaTranscoder>,
    narration: Arc<dyn NarrationClient>,
    media_root: PathBuf,
}

impl HealthService {
    pub fn new(
        pool: SqlitePool,
        storage: Arc<dyn Storage>,
        transcoder: Arc<dyn MediaTranscoder>,
        narration: Arc<dyn NarrationClient>,
        media_root: PathBuf,
    ) -> Self {
        Self {
            pool,
            storage,
            transcoder,
            narration,
            media_root,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn check(&self) -> HealthReport {
        let pool = self.pool.clone();
        let database = run_check(
            async move { sqlx::query("SELECT 1").execute(&pool).await.map(drop) },
            "unhealthy",
        )
        .await;
        let storage = run_check(
            async { self.storage.exists("health-check-non-existent-key").await.map(drop) },
            "unhealthy",
        )
        .await;
        let tools = run_check(self.transcoder.check_tools(), "unhealthy").await;
        let narration = run_check(self.narration.health_check(), "unreachable").await;

        let media_root = self.media_root.clone();
        let disk = match tokio::task::spawn_blocking(move || disk_usage(&media_root)).await {
            Ok(disk) => disk,
            Err(e) => {
                tracing::warn!(error = %e, "Disk usage lookup panicked");
                None
            }
        };

        let mut report = HealthReport {
            status: HealthStatus::Healthy,
            database,
            storage,
            tools,
            narration,
            disk,
            checked_at: Utc::now(),
        };
        report.status = report.overall();

        match report.status {
            HealthStatus::Healthy => tracing::debug!("Health check passed"),
            HealthStatus::Degraded => tracing::warn!(
                narration = %report.narration,
                used_ratio = report.disk.as_ref().map(|d| d.used_ratio),
                "Health check degraded"
            ),
            HealthStatus::Unhealthy => tracing::error!(
                database = %report.database,
                storage = %report.storage,
                tools = %report.tools,
                "Health check failed"
            ),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, fixture_with, FakeNarration, FakeTranscoder};
    use airwave_processing::HttpNarrationClient;
    use std::sync::atomic::Ordering;

    fn report(narration: &str, used_ratio: Option<f64>) -> HealthReport {
        HealthReport {
            status: HealthStatus::Healthy,
            database: HEALTHY.to_string(),
            storage: HEALTHY.to_string(),
            tools: HEALTHY.to_string(),
            narration: narration.to_string(),
            disk: used_ratio.map(|used_ratio| DiskUsage {
                mount_point: PathBuf::from("/"),
                total_bytes: 100,
                available_bytes: 100 - (used_ratio * 100.0) as u64,
                used_ratio,
            }),
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_overall_status() {
        assert_eq!(report(HEALTHY, Some(0.5)).overall(), HealthStatus::Healthy);
        assert_eq!(report(HEALTHY, None).overall(), HealthStatus::Healthy);
        assert_eq!(report(HEALTHY, Some(0.95)).overall(), HealthStatus::Degraded);
        assert_eq!(report("unreachable: 503", Some(0.1)).overall(), HealthStatus::Degraded);

        let mut down = report(HEALTHY, Some(0.1));
        down.database = "unhealthy: database is locked".to_string();
        assert_eq!(down.overall(), HealthStatus::Unhealthy);
    }

    fn service_with(state: &crate::AppState, narration: Arc<dyn NarrationClient>) -> HealthService {
        HealthService::new(
            state.pool.clone(),
            state.storage.clone(),
            state.transcoder.clone(),
            narration,
            state.settings.media_root.clone(),
        )
    }

    #[tokio::test]
    async fn test_health_checks_narration_endpoint() {
        let fixture = fixture().await;
        let mut server = mockito::Server::new_async().await;
        let health = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;
        let client = HttpNarrationClient::new(server.url(), Duration::from_secs(5)).unwrap();

        let report = service_with(&fixture.state, Arc::new(client)).check().await;
        assert_eq!(report.database, HEALTHY);
        assert_eq!(report.storage, HEALTHY);
        assert_eq!(report.tools, HEALTHY);
        assert_eq!(report.narration, HEALTHY);
        assert_ne!(report.status, HealthStatus::Unhealthy);
        health.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_narration_degrades() {
        let fixture = fixture().await;
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(503)
            .with_body("model loading")
            .create_async()
            .await;
        let client = HttpNarrationClient::new(server.url(), Duration::from_secs(5)).unwrap();

        let report = service_with(&fixture.state, Arc::new(client)).check().await;
        assert!(report.narration.starts_with("unreachable"));
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_missing_tools_are_unhealthy() {
        let transcoder = Arc::new(FakeTranscoder::default());
        transcoder.tools_missing.store(true, Ordering::SeqCst);
        let narration = Arc::new(FakeNarration::default());
        narration.fail_health.store(true, Ordering::SeqCst);
        let fixture = fixture_with(transcoder, narration).await;

        let report = fixture.state.health().check().await;
        assert!(report.tools.contains("ffmpeg"));
        assert!(report.narration.starts_with("unreachable"));
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_closed_database_is_unhealthy() {
        let fixture = fixture().await;
        fixture.state.pool.close().await;

        let report = fixture.state.health().check().await;
        assert!(report.database.starts_with("unhealthy"));
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }
}
