//! Job execution error types
//!
//! Handlers return these to tell the dispatcher whether a failure should be
//! retried, fail the job right away, or end it as cancelled.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Recoverable,
    Unrecoverable,
    Cancelled,
}

/// Job execution error that is recoverable, unrecoverable or a cooperative cancellation
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    disposition: Disposition,
}

impl TaskError {
    /// Create a new unrecoverable error
    ///
    /// The job fails immediately, regardless of remaining attempts. Use this for
    /// input that will not change on retry (corrupt media, overlong duration,
    /// a payload that does not match the job row).
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            disposition: Disposition::Unrecoverable,
        }
    }

    /// Create a new recoverable error
    ///
    /// The job is requeued with backoff until its attempts are exhausted.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            disposition: Disposition::Recoverable,
        }
    }

    /// The handler observed a cancellation request between stages.
    pub fn cancelled(stage: &str) -> Self {
        Self {
            inner: anyhow::anyhow!("Cancelled before stage '{}'", stage),
            disposition: Disposition::Cancelled,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.disposition == Disposition::Recoverable
    }

    pub fn is_cancelled(&self) -> bool {
        self.disposition == Disposition::Cancelled
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    /// Default conversion from anyhow::Error creates a recoverable error
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Extension trait for Result to easily create unrecoverable task errors
pub trait TaskResultExt<T> {
    /// Mark this result as unrecoverable on error
    fn unrecoverable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, TaskError> {
        self.map_err(|e| TaskError::unrecoverable(e.into()))
    }
}
