use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use shelfsync_core::{LogError, QueueError};

pub mod event_log;
pub mod task_queue;

pub use event_log::SqlEventLog;
pub use task_queue::SqlTaskQueue;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for LogError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => LogError::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => LogError::Corrupt(message),
        }
    }
}

impl From<RepositoryError> for QueueError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => QueueError::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => QueueError::Codec(message),
        }
    }
}

/// Fixed-width RFC3339 so stored timestamps order correctly as text.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative integer): {value}"
        ))
    })
}

pub(crate) fn to_i64(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("value for `{column}` out of range: {value}")))
}

pub(crate) fn offset(from: DateTime<Utc>, by: std::time::Duration) -> Result<DateTime<Utc>, RepositoryError> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| from.checked_add_signed(by))
        .ok_or_else(|| RepositoryError::Decode(format!("duration {by:?} out of range")))
}
