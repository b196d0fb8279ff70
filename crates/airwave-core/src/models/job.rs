use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transcode,
    GenerateIntro,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Transcode, JobKind::GenerateIntro];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Transcode => "transcode",
            JobKind::GenerateIntro => "generate_intro",
        }
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcode" => Ok(JobKind::Transcode),
            "generate_intro" => Ok(JobKind::GenerateIntro),
            _ => Err(anyhow::anyhow!("Invalid job kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Leased,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Leased => "leased",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "leased" => Ok(JobState::Leased),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid job state: {}", s)),
        }
    }
}

/// Typed job payload, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Transcode { media_id: Uuid },
    GenerateIntro { media_id: Uuid },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Transcode { .. } => JobKind::Transcode,
            JobPayload::GenerateIntro { .. } => JobKind::GenerateIntro,
        }
    }

    pub fn media_id(&self) -> Uuid {
        match self {
            JobPayload::Transcode { media_id } | JobPayload::GenerateIntro { media_id } => {
                *media_id
            }
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobPayloadError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Payload kind {payload} does not match job kind {job}")]
    KindMismatch { job: JobKind, payload: JobKind },

    #[error("Payload media {payload} does not match job media {job}")]
    MediaMismatch { job: Uuid, payload: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub media_id: Uuid,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Number of leases granted so far, including the current one.
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub lease_token: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub available_at: DateTime<Utc>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for Job {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let payload: String = row.try_get("payload")?;
        Ok(Job {
            id: row.try_get("id")?,
            kind: row.try_get::<String, _>("kind")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse job kind: {}", e).into())
            })?,
            media_id: row.try_get("media_id")?,
            // Kept raw so a malformed payload is caught when the job is leased.
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::String(payload)),
            state: row.try_get::<String, _>("state")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse job state: {}", e).into())
            })?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            last_error: row.try_get("last_error")?,
            lease_token: row.try_get("lease_token")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            available_at: row.try_get("available_at")?,
            cancel_requested: row.try_get("cancel_requested")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

impl Job {
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Leased && self.lease_expires_at.is_some_and(|at| at <= now)
    }

    /// Decode the payload and check it agrees with the job row.
    pub fn typed_payload(&self) -> Result<JobPayload, JobPayloadError> {
        let payload: JobPayload = serde_json::from_value(self.payload.clone())?;
        if payload.kind() != self.kind {
            return Err(JobPayloadError::KindMismatch {
                job: self.kind,
                payload: payload.kind(),
            });
        }
        if payload.media_id() != self.media_id {
            return Err(JobPayloadError::MediaMismatch {
                job: self.media_id,
                payload: payload.media_id(),
            });
        }
        Ok(payload)
    }
}

/// Result of reporting a failed attempt.
#[derive(Debug, Clone)]
pub enum FailOutcome {
    /// Requeued; eligible again at `retry_at`.
    Retrying { attempt: i32, retry_at: DateTime<Utc> },
    /// Terminally failed; the owning media item must be updated.
    Exhausted(Job),
    /// The lease token no longer matches; another worker owns the job.
    LeaseLost,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct JobStats {
    pub total: i64,
    pub queued: i64,
    pub leased: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(kind: JobKind, media_id: Uuid, payload: serde_json::Value) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind,
            media_id,
            payload,
            state: JobState::Leased,
            attempts: 1,
            max_attempts: 3,
            last_error: None,
            lease_token: Some(Uuid::new_v4()),
            lease_expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            available_at: Utc::now(),
            cancel_requested: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            finished_at: None,
        }
    }

    #[test]
    fn test_payload_is_tagged_by_kind() {
        let media_id = Uuid::new_v4();
        let value = JobPayload::GenerateIntro { media_id }.to_value();
        assert_eq!(value["kind"], "generate_intro");
        assert_eq!(value["media_id"], media_id.to_string());
    }

    #[test]
    fn test_typed_payload_accepts_matching_row() {
        let media_id = Uuid::new_v4();
        let job = job_with(
            JobKind::Transcode,
            media_id,
            JobPayload::Transcode { media_id }.to_value(),
        );
        assert_eq!(
            job.typed_payload().unwrap(),
            JobPayload::Transcode { media_id }
        );
    }

    #[test]
    fn test_typed_payload_rejects_mismatch() {
        let media_id = Uuid::new_v4();
        let job = job_with(
            JobKind::Transcode,
            media_id,
            JobPayload::GenerateIntro { media_id }.to_value(),
        );
        assert!(matches!(
            job.typed_payload(),
            Err(JobPayloadError::KindMismatch { .. })
        ));

        let other = job_with(
            JobKind::Transcode,
            media_id,
            JobPayload::Transcode {
                media_id: Uuid::new_v4(),
            }
            .to_value(),
        );
        assert!(matches!(
            other.typed_payload(),
            Err(JobPayloadError::MediaMismatch { .. })
        ));

        let garbage = job_with(JobKind::Transcode, media_id, serde_json::json!({"x": 1}));
        assert!(matches!(
            garbage.typed_payload(),
            Err(JobPayloadError::Malformed(_))
        ));
    }

    #[test]
    fn test_retry_budget() {
        let mut job = job_with(JobKind::Transcode, Uuid::new_v4(), serde_json::json!({}));
        assert!(job.can_retry());
        job.attempts = 3;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_lease_expiry() {
        let job = job_with(JobKind::Transcode, Uuid::new_v4(), serde_json::json!({}));
        assert!(job.lease_expired(Utc::now()));
        let mut queued = job.clone();
        queued.state = JobState::Queued;
        assert!(!queued.lease_expired(Utc::now()));
    }

    #[test]
    fn test_state_parse_and_terminal() {
        assert_eq!("leased".parse::<JobState>().unwrap(), JobState::Leased);
        assert!("running".parse::<JobState>().is_err());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert_eq!(
            "generate_intro".parse::<JobKind>().unwrap(),
            JobKind::GenerateIntro
        );
    }
}
