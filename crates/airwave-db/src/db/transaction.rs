//! Database transaction utilities
//!
//! SQLite only allows one writer at a time. A deferred transaction that reads
//! first and writes later can fail to upgrade its lock, so multi-statement
//! writers here take the write lock up front with `BEGIN IMMEDIATE`.

use airwave_core::AppError;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::borrow::Cow;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

const WRITE_MAX_RETRIES: u32 = 8;
const WRITE_BASE_DELAY_MS: u64 = 10;
const WRITE_MAX_DELAY_MS: u64 = 500;

/// A manual `BEGIN IMMEDIATE` transaction on a pooled connection.
///
/// ```ignore
/// let mut tx = ImmediateTransaction::begin(&pool).await?;
/// sqlx::query("UPDATE ...").execute(&mut *tx).await?;
/// tx.commit().await?;
/// ```
///
/// Dropping it without commit or rollback closes the connection instead of
/// returning it to the pool, which discards the open transaction.
pub struct ImmediateTransaction {
    conn: PoolConnection<Sqlite>,
    finished: bool,
}

impl ImmediateTransaction {
    pub async fn begin(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }

    /// Commit when `result` is Ok, roll back otherwise, and pass `result` through.
    pub async fn finish<T>(self, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back transaction");
                }
                Err(err)
            }
        }
    }
}

impl Deref for ImmediateTransaction {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for ImmediateTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Immediate transaction dropped without commit, closing connection");
            self.conn.close_on_drop();
        }
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED, including their extended codes.
pub fn is_sqlite_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        let msg = err.to_string().to_ascii_lowercase();
        return msg.contains("database is locked") || msg.contains("database is busy");
    };

    let code = db_err.code().map(Cow::into_owned);
    if matches!(
        code.as_deref(),
        Some("5") | Some("6") | Some("261") | Some("262") | Some("517")
    ) {
        return true;
    }

    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn is_retryable(err: &AppError) -> bool {
    match err {
        AppError::Database(db_err) => is_sqlite_busy(db_err),
        AppError::QueueConflict(_) => true,
        _ => false,
    }
}

/// Re-run a write transaction while it fails with lock contention or a
/// position conflict, with capped exponential backoff and jitter.
pub async fn retry_write<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }
                if attempt >= WRITE_MAX_RETRIES {
                    tracing::warn!(
                        operation = op_name,
                        attempts = attempt + 1,
                        error = %err,
                        "Write still conflicting after retries"
                    );
                    // Position conflicts are resolved internally and never reach callers.
                    return Err(match err {
                        AppError::QueueConflict(detail) => AppError::Internal(format!(
                            "{} gave up after {} attempts: {}",
                            op_name,
                            attempt + 1,
                            detail
                        )),
                        other => other,
                    });
                }

                let backoff_ms = WRITE_BASE_DELAY_MS
                    .saturating_mul(1u64 << attempt)
                    .min(WRITE_MAX_DELAY_MS);
                let jitter_ms = rand::random::<u64>() % (backoff_ms / 4 + 1);
                let delay = Duration::from_millis(backoff_ms + jitter_ms);

                tracing::debug!(
                    operation = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Write conflict, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::{connect, connect_in_memory, run_migrations};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_rollback_on_drop_discards_writes() {
        // Dropping closes the connection, which would lose an in-memory database.
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tx.db").display());
        let pool = connect(&url, 2, Duration::from_millis(500)).await.unwrap();
        run_migrations(&pool).await.unwrap();

        {
            let mut tx = ImmediateTransaction::begin(&pool).await.unwrap();
            sqlx::query("INSERT INTO playlists (id, name, created_at) VALUES (?, 'tmp', ?)")
                .bind(uuid::Uuid::new_v4())
                .bind(chrono::Utc::now())
                .execute(&mut *tx)
                .await
                .unwrap();
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM playlists")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_commit_persists_writes() {
        let pool = connect_in_memory().await.unwrap();

        let mut tx = ImmediateTransaction::begin(&pool).await.unwrap();
        sqlx::query("INSERT INTO playlists (id, name, created_at) VALUES (?, 'kept', ?)")
            .bind(uuid::Uuid::new_v4())
            .bind(chrono::Utc::now())
            .execute(&mut *tx)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM playlists")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_finish_rolls_back_on_error() {
        let pool = connect_in_memory().await.unwrap();

        let mut tx = ImmediateTransaction::begin(&pool).await.unwrap();
        sqlx::query("INSERT INTO playlists (id, name, created_at) VALUES (?, 'gone', ?)")
            .bind(uuid::Uuid::new_v4())
            .bind(chrono::Utc::now())
            .execute(&mut *tx)
            .await
            .unwrap();
        let result: Result<(), AppError> = tx
            .finish(Err(AppError::InvalidInput("stop".to_string())))
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM playlists")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_retry_write_retries_conflicts_only() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, AppError> = retry_write("test", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(AppError::QueueConflict("position taken".to_string()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), AppError> = retry_write("test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::NotEligible("not approved".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::NotEligible(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_conflict_is_internal() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), AppError> = retry_write("append", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::QueueConflict("position taken".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Internal(ref msg)) if msg.contains("append")));
        assert_eq!(counter.load(Ordering::SeqCst), WRITE_MAX_RETRIES + 1);
    }
}
