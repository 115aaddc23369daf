//! Error types for the connection pool

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by factories, health checks and disposers
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Pool is closed")]
    PoolClosed,

    #[error("Failed to create connection: {0}")]
    ResourceCreationFailed(#[source] Arc<dyn StdError + Send + Sync + 'static>),

    #[error("Checkout timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Checkout was cancelled before a connection was leased")]
    Cancelled,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Scheduler could not be started: {0}")]
    SchedulerUnavailable(String),
}

impl PoolError {
    pub(crate) fn creation_failed(error: BoxError) -> Self {
        PoolError::ResourceCreationFailed(Arc::from(error))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
