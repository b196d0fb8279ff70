//! Setup shared by the `airwave` binary: telemetry, wiring and output.

use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use airwave_core::{AppError, Config, ErrorMetadata, LogLevel};
use airwave_db::{connect, run_migrations};
use airwave_processing::{FfmpegTranscoder, HttpNarrationClient, TranscodeProfile};
use airwave_services::Components;
use airwave_storage::LocalStorage;

const DEFAULT_FILTER: &str = "airwave=info,sqlx=warn";

/// Initialize tracing. Logs go to stderr so stdout stays machine-readable.
/// `LOG_FORMAT=json` switches to the JSON formatter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Open the database, run migrations and build the external collaborators.
pub async fn build_components(config: &Config) -> anyhow::Result<Components> {
    let settings = config.settings();

    let pool = connect(
        config.database_url(),
        settings.db_max_connections,
        Duration::from_millis(settings.db_busy_timeout_ms),
    )
    .await?;
    run_migrations(&pool).await?;

    let storage = LocalStorage::new(config.media_root())
        .await
        .with_context(|| format!("Failed to open media root {}", config.media_root().display()))?;
    let transcoder = FfmpegTranscoder::new(
        config.ffmpeg_path().to_string(),
        config.ffprobe_path().to_string(),
        TranscodeProfile::from_config(settings),
    );
    let narration = HttpNarrationClient::new(config.narration_url(), config.narration_timeout())
        .context("Failed to build narration client")?;

    tracing::info!(
        environment = %settings.environment,
        media_root = %config.media_root().display(),
        dedup_policy = ?settings.dedup_policy,
        max_upload_size_mb = config.max_upload_size_bytes() / 1024 / 1024,
        "Airwave initialized"
    );

    Ok(Components {
        settings: settings.clone(),
        pool,
        storage: Arc::new(storage),
        transcoder: Arc::new(transcoder),
        narration: Arc::new(narration),
    })
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

/// Caller-facing body for a failed command. Pipeline errors expose only their
/// code and client message; anything else is reported as internal.
pub fn error_body(err: &anyhow::Error) -> serde_json::Value {
    match err.downcast_ref::<AppError>() {
        Some(app) => {
            let message = if app.is_sensitive() {
                "An internal error occurred".to_string()
            } else {
                app.client_message()
            };
            serde_json::json!({
                "error": app.error_code(),
                "message": message,
                "suggested_action": app.suggested_action(),
            })
        }
        None => serde_json::json!({
            "error": "INTERNAL_ERROR",
            "message": err.to_string(),
        }),
    }
}

/// Log a failed command with full diagnostic detail.
pub fn log_error(err: &anyhow::Error) {
    match err.downcast_ref::<AppError>() {
        Some(app) => match app.log_level() {
            LogLevel::Debug => tracing::debug!(error = %app.detailed_message(), "Command rejected"),
            LogLevel::Warn => tracing::warn!(error = %app.detailed_message(), "Command failed"),
            LogLevel::Error => tracing::error!(error = %app.detailed_message(), "Command failed"),
        },
        None => tracing::error!(error = ?err, "Command failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_body_uses_client_message() {
        let existing_id = Uuid::new_v4();
        let err = anyhow::Error::from(AppError::DuplicateContent { existing_id });
        let body = error_body(&err);
        assert_eq!(body["error"], "DUPLICATE_CONTENT");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains(&existing_id.to_string()));
    }

    #[test]
    fn test_error_body_hides_sensitive_details() {
        let err = anyhow::Error::from(AppError::Storage("/srv/media/audio: permission denied".to_string()));
        let body = error_body(&err);
        assert!(!body["message"].as_str().unwrap().contains("/srv/media"));
    }

    #[test]
    fn test_error_body_for_plain_errors() {
        let err = anyhow::anyhow!("Invalid DATABASE_URL");
        let body = error_body(&err);
        assert_eq!(body["error"], "INTERNAL_ERROR");
        assert_eq!(body["message"], "Invalid DATABASE_URL");
    }
}
