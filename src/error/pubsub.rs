use thiserror::Error;
use tokio::sync::mpsc;

/// Ошибки операций хаба и топиков.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    /// Область отмены топика (или хаба) уже отменена.
    #[error("topic is already closed")]
    AlreadyClosed,

    #[error("invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("queue size must be positive, got {0}")]
    InvalidQueueSize(usize),

    #[error("configuration error: {0}")]
    Config(String),

    /// Топику нужен запущенный Tokio runtime для фоновых задач.
    #[error("no Tokio runtime available to spawn topic tasks")]
    NoRuntime,
}

/// Ошибка при ожидании сообщения с таймаутом.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecvError {
    #[error("subscription is closed")]
    Closed,

    #[error("operation exceeded the specified timeout")]
    Timeout,
}

/// Ошибка при неблокирующем получении сообщения.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TryRecvError {
    #[error("no messages available")]
    Empty,

    #[error("subscription is closed")]
    Closed,
}

// === Преобразования ===

impl From<globset::Error> for PubSubError {
    fn from(err: globset::Error) -> Self {
        let pattern = err.glob().unwrap_or_default().to_string();
        PubSubError::InvalidPattern {
            pattern,
            reason: err.kind().to_string(),
        }
    }
}

impl From<config::ConfigError> for PubSubError {
    fn from(err: config::ConfigError) -> Self {
        PubSubError::Config(err.to_string())
    }
}

impl From<mpsc::error::TryRecvError> for TryRecvError {
    fn from(err: mpsc::error::TryRecvError) -> Self {
        match err {
            mpsc::error::TryRecvError::Empty => TryRecvError::Empty,
            mpsc::error::TryRecvError::Disconnected => TryRecvError::Closed,
        }
    }
}
