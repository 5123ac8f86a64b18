//! Scheduler error types

use ctx_core::SensorError;
use ctx_eval::EvalError;
use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by the engine's registration API
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Sensor setup failed for {id}: {source}")]
    Setup {
        id: String,
        #[source]
        source: SensorError,
    },

    #[error("Invalid expression {id}: {source}")]
    InvalidExpression {
        id: String,
        #[source]
        source: EvalError,
    },

    #[error("Invalid expression id: {0:?}")]
    InvalidId(String),

    #[error("Expression already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Expression not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
