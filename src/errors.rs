use thiserror::Error;

/// Errors are `Clone` because a poisoned queue hands the same failure to every
/// submission that is skipped behind it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("no tokio runtime available to drive the task queue")]
    NoRuntime,

    #[error("Store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Corrupt datafile: {0}")]
    Corruption(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Serde JSON: {0}")]
    Json(String),

    #[error("BSON: {0}")]
    Bson(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("task aborted: {0}")]
    TaskAborted(String),

    #[error("task queue closed")]
    QueueClosed,
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

impl From<bson::error::Error> for DbError {
    fn from(e: bson::error::Error) -> Self {
        Self::Bson(e.to_string())
    }
}

impl From<toml::de::Error> for DbError {
    fn from(e: toml::de::Error) -> Self {
        Self::Configuration(e.to_string())
    }
}
