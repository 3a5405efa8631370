use thiserror::Error;
use uuid::Uuid;

use crate::intent::models::IntentStatus;

/// Top-level error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger unreachable: {0}")]
    Transient(String),

    #[error("Consolidation exhausted after {attempts} attempts for intent {intent_id}")]
    ConsolidationExhausted { intent_id: Uuid, attempts: i32 },

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: IntentStatus,
        to: IntentStatus,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        EngineError::Transient(format!("HTTP request error: {:?}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for EngineError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        EngineError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the engine
pub type EngineResult<T> = Result<T, EngineError>;
