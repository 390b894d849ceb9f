use std::time::Duration;
use thiserror::Error;

/// Failure of a single HTTP fetch against the match source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network error, timeout, 503 or 429. `retry_after` is set when the
    /// server told us how long to wait.
    #[error("transient fetch failure for {url}: {reason}")]
    Transient {
        url: String,
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Any other non-success status. Never retried.
    #[error("permanent fetch failure for {url}: HTTP {status}")]
    Permanent { url: String, status: u16 },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Missing or implausible structure in a source page.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("expected exactly 2 teams, found {found}")]
    TeamCount { found: usize },

    #[error("invalid CSS selector '{0}'")]
    Selector(String),
}

#[derive(Debug, Error)]
#[error("implausible {field} for {player}: {value}")]
pub struct ValidationError {
    pub player: String,
    pub field: &'static str,
    pub value: f64,
}

/// Everything that can fail one match unit inside the orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A unique key was taken between our lookup and our write.
    #[error("conflicting write on {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("sync cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        let conflict = e
            .as_database_error()
            .filter(|db| db.is_unique_violation())
            .map(|db| db.message().to_string());
        match conflict {
            Some(message) => SyncError::Conflict(message),
            None => SyncError::Database(e),
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
