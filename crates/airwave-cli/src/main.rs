//! airwave: ingest and scheduling pipeline for an automated radio station.
//!
//! Configuration comes from the environment (and `.env`); see `airwave_core::config`.
//! `serve` runs the job workers and the retention sweeper; every other command
//! works against the same database and media root and prints JSON.

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use airwave_cli::{build_components, error_body, init_tracing, log_error, print_json};
use airwave_core::models::MediaKind;
use airwave_core::Config;
use airwave_services::{AppState, HealthStatus, UploadMetadata};
use airwave_worker::JobQueueConfig;

#[derive(Parser)]
#[command(name = "airwave", about = "AI radio ingest pipeline and playlist scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job workers and the retention sweeper until interrupted
    Serve,
    /// Validate and store a file, then queue it for processing
    Ingest {
        /// Path to the audio or video file
        file: PathBuf,
        /// Declared kind: audio or video
        #[arg(long)]
        kind: MediaKind,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        uploader: Option<String>,
        /// Run queued jobs on this process before returning
        #[arg(long)]
        wait: bool,
    },
    /// Show a media item with its transition history and jobs
    Status {
        /// Media UUID
        id: Uuid,
    },
    /// Send a failed media item back through the pipeline
    Retry {
        /// Media UUID
        id: Uuid,
        /// Replacement source file
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Job queue operations
    Jobs {
        #[command(subcommand)]
        sub: JobCommands,
    },
    /// Playlist operations
    Playlist {
        #[command(subcommand)]
        sub: PlaylistCommands,
    },
    /// Run one retention sweep
    Sweep,
    /// Check the database, media root, ffmpeg tools, narration service and disk space
    Health,
}

#[derive(Subcommand)]
enum JobCommands {
    /// Job counts per state
    Stats,
    /// Cancel a queued job, or ask a running one to stop
    Cancel {
        /// Job UUID
        id: Uuid,
    },
    /// Requeue a failed or cancelled job
    Retry {
        /// Job UUID
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum PlaylistCommands {
    /// List playlists
    List,
    /// Show the entries of a playlist
    Show {
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Append an approved item
    Append {
        media_id: Uuid,
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Insert an approved item at a position
    Insert {
        position: i64,
        media_id: Uuid,
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Remove an entry
    Remove {
        entry_id: Uuid,
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Show the entry at the head without consuming it
    Next {
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Consume the head entry and record the play
    Advance {
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Write the playlist as M3U under the media root
    Export {
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Compose the host's segue from the head entry to the next
    Transition {
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Generate the daily playlist (default: today)
    Daily {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file path: {}", path.display()))
}

async fn open(path: &Path) -> anyhow::Result<tokio::fs::File> {
    tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let components = build_components(config).await?;
    let queue_config = JobQueueConfig::from_settings(config.settings());
    let state = AppState::with_workers(components, queue_config);

    let health = state.health().check().await;
    if health.status == HealthStatus::Unhealthy {
        state.queue.shutdown().await;
        anyhow::bail!(
            "Startup health check failed (database: {}, storage: {}, tools: {})",
            health.database,
            health.storage,
            health.tools
        );
    }

    let shutdown = CancellationToken::new();
    let sweeper = Arc::new(state.sweeper()).start(shutdown.clone());
    tracing::info!(
        max_workers = config.settings().job_max_workers,
        sweep_interval_secs = config.sweep_interval().as_secs(),
        current_playlist = %config.current_playlist(),
        "Workers and retention sweeper running"
    );

    shutdown_signal().await;

    shutdown.cancel();
    state.queue.shutdown().await;
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Retention sweeper task failed");
    }
    tracing::info!("Shut down");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Serve => {
            serve(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        command => {
            let components = build_components(&config).await?;
            let state =
                AppState::without_workers(components, JobQueueConfig::from_settings(config.settings()));
            execute(command, &state, &config).await
        }
    }
}

/// One-shot commands. Jobs they enqueue are left for `serve` unless `--wait` is given.
async fn execute(command: Commands, state: &Arc<AppState>, config: &Config) -> anyhow::Result<ExitCode> {
    let playlist_name = |name: Option<String>| name.unwrap_or_else(|| config.current_playlist().to_string());

    match command {
        Commands::Serve => serve(config).await?,
        Commands::Ingest {
            file,
            kind,
            title,
            description,
            category,
            tags,
            uploader,
            wait,
        } => {
            let metadata = UploadMetadata {
                title,
                description,
                category,
                tags,
                uploader,
            };
            let filename = file_name(&file)?;
            let receipt = state
                .ingest()
                .ingest(open(&file).await?, &filename, kind, metadata)
                .await?;

            if wait {
                state.inline_dispatcher().drain().await?;
                print_json(&state.lifecycle().status(receipt.media_id).await?)?;
            } else {
                print_json(&receipt)?;
            }
        }
        Commands::Status { id } => {
            print_json(&state.lifecycle().status(id).await?)?;
        }
        Commands::Retry { id, source } => {
            let item = match source {
                Some(path) => {
                    let filename = file_name(&path)?;
                    state
                        .lifecycle()
                        .retry_with_source(id, open(&path).await?, &filename)
                        .await?
                }
                None => state.lifecycle().retry_failed(id).await?,
            };
            print_json(&item)?;
        }
        Commands::Jobs { sub } => match sub {
            JobCommands::Stats => print_json(&state.jobs.stats().await?)?,
            JobCommands::Cancel { id } => print_json(&state.jobs.cancel(id).await?)?,
            JobCommands::Retry { id } => match state.jobs.retry(id).await? {
                Some(job) => print_json(&job)?,
                None => anyhow::bail!("Job {} is not failed or cancelled", id),
            },
        },
        Commands::Playlist { sub } => {
            let scheduler = state.scheduler();
            match sub {
                PlaylistCommands::List => print_json(&scheduler.list().await?)?,
                PlaylistCommands::Show { playlist } => {
                    print_json(&scheduler.show(&playlist_name(playlist)).await?)?
                }
                PlaylistCommands::Append { media_id, playlist } => {
                    print_json(&scheduler.append(&playlist_name(playlist), media_id).await?)?
                }
                PlaylistCommands::Insert {
                    position,
                    media_id,
                    playlist,
                } => print_json(
                    &scheduler
                        .insert(&playlist_name(playlist), position, media_id)
                        .await?,
                )?,
                PlaylistCommands::Remove { entry_id, playlist } => {
                    print_json(&scheduler.remove(&playlist_name(playlist), entry_id).await?)?
                }
                PlaylistCommands::Next { playlist } => {
                    print_json(&scheduler.peek_next(&playlist_name(playlist)).await?)?
                }
                PlaylistCommands::Advance { playlist } => {
                    print_json(&scheduler.advance(&playlist_name(playlist)).await?)?
                }
                PlaylistCommands::Export { playlist } => {
                    let key = scheduler.export_m3u(&playlist_name(playlist)).await?;
                    let path = state.storage.resolve(&key)?;
                    print_json(&serde_json::json!({ "key": key, "path": path }))?
                }
                PlaylistCommands::Transition { playlist } => {
                    print_json(&scheduler.transition(&playlist_name(playlist)).await?)?
                }
                PlaylistCommands::Daily { date } => {
                    let date = date.unwrap_or_else(|| Local::now().date_naive());
                    let (playlist, entries) = scheduler.generate_daily(date).await?;
                    print_json(&serde_json::json!({ "playlist": playlist, "entries": entries }))?
                }
            }
        }
        Commands::Sweep => print_json(&state.sweeper().sweep().await?)?,
        Commands::Health => {
            let report = state.health().check().await;
            print_json(&report)?;
            if report.status == HealthStatus::Unhealthy {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let result = async {
        let config = Config::from_env().context("Failed to load configuration")?;
        config.validate().context("Invalid configuration")?;
        run(cli, config).await
    }
    .await;

    match result {
        Ok(code) => code,
        Err(err) => {
            log_error(&err);
            match serde_json::to_string_pretty(&error_body(&err)) {
                Ok(body) => println!("{}", body),
                Err(_) => eprintln!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}
