use thiserror::Error;

/// Why one resolution or fetch attempt failed. Handed to
/// [`UpdateListener::on_update_failed`](crate::UpdateListener::on_update_failed).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected http status {status}")]
    HttpStatus { status: u16 },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("identity resolution failed: {0}")]
    Resolution(String),
    #[error("user id must not be empty")]
    InvalidUserId,
    #[error("{stage} timed out after {after_ms}ms")]
    Timeout { stage: &'static str, after_ms: u64 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite store failed: {0}")]
    Sqlite(String),
    #[error("store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e.to_string())
    }
}
