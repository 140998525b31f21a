use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Unexpected fault inside a single detector's computation.
/// The pipeline logs these and treats them as "no alert this cycle".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    #[error("{what} is not finite ({value})")]
    NonFinite { what: &'static str, value: f64 },

    #[error("{what} is negative ({value})")]
    Negative { what: &'static str, value: f64 },
}

/// A snapshot rejected by `EntityState::record`. The entity is left untouched.
/// Snapshots must arrive in non-decreasing `observed_at` order per token.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("invalid snapshot for token {token_id}: {reason}")]
    InvalidSnapshot { token_id: String, reason: String },

    #[error("stale snapshot for token {token_id}: observed {observed_at}, already at {last_observed_at}")]
    StaleSnapshot {
        token_id: String,
        observed_at: DateTime<Utc>,
        last_observed_at: DateTime<Utc>,
    },
}
