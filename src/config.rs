//! Pool configuration options

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{PoolError, PoolResult};
use crate::eviction::EvictionPolicy;
use crate::health::{HealthCheck, always_healthy};
use crate::lifecycle::{Disposer, close_silently};
use crate::scheduler::Scheduler;

/// Configuration for connection pool behavior
///
/// Every option has a default; invalid combinations are rejected by
/// [`validate`](Self::validate) when the pool is built, never at use.
///
/// # Examples
///
/// ```
/// use esox_connpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::<String>::new()
///     .with_max_pool_size(10)
///     .with_idle_time_before_health_check(Duration::from_secs(30))
///     .with_checkout_retry_interval(Duration::from_secs(5));
///
/// assert_eq!(config.max_pool_size, 10);
/// assert_eq!(config.max_idle_time, Duration::from_secs(1800));
/// assert!(config.validate().is_ok());
/// ```
pub struct PoolConfiguration<T> {
    /// Maximum number of connections tracked by the pool (leased + idle)
    pub max_pool_size: usize,

    /// Idle age after which a connection is health checked before reuse
    pub idle_time_before_health_check: Duration,

    /// Idle age after which a connection is disposed unconditionally
    pub max_idle_time: Duration,

    /// Delay between checkout retries while the pool is exhausted
    pub checkout_retry_interval: Duration,

    /// Delay before acquisition is retried after a failed health check
    pub return_to_pool_delay_after_health_check_failure: Duration,

    /// Period of the background sweep that evicts expired idle connections
    pub idle_sweep_interval: Duration,

    /// Decides whether an idle connection is still usable
    pub health_check: Arc<dyn HealthCheck<T>>,

    /// Tears down evicted connections
    pub disposer: Arc<dyn Disposer<T>>,

    /// Where pool work runs. `None` starts a dedicated runtime with
    /// `max_pool_size` worker threads.
    pub scheduler: Option<Arc<dyn Scheduler>>,
}

impl<T: Send + 'static> Default for PoolConfiguration<T> {
    fn default() -> Self {
        Self {
            max_pool_size: 5,
            idle_time_before_health_check: Duration::from_millis(60_000),
            max_idle_time: Duration::from_millis(1_800_000),
            checkout_retry_interval: Duration::from_millis(30_000),
            return_to_pool_delay_after_health_check_failure: Duration::from_millis(1_000),
            idle_sweep_interval: Duration::from_millis(60_000),
            health_check: Arc::new(always_healthy::<T>),
            disposer: Arc::new(close_silently::<T>),
            scheduler: None,
        }
    }
}

impl<T: Send + 'static> PoolConfiguration<T> {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum pool size
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn with_idle_time_before_health_check(mut self, age: Duration) -> Self {
        self.idle_time_before_health_check = age;
        self
    }

    pub fn with_max_idle_time(mut self, age: Duration) -> Self {
        self.max_idle_time = age;
        self
    }

    pub fn with_checkout_retry_interval(mut self, interval: Duration) -> Self {
        self.checkout_retry_interval = interval;
        self
    }

    pub fn with_return_to_pool_delay_after_health_check_failure(mut self, delay: Duration) -> Self {
        self.return_to_pool_delay_after_health_check_failure = delay;
        self
    }

    pub fn with_idle_sweep_interval(mut self, interval: Duration) -> Self {
        self.idle_sweep_interval = interval;
        self
    }

    /// Set the health check
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::<u32>::new()
    ///     .with_health_check(|conn: &u32| *conn != 0);
    /// ```
    pub fn with_health_check(mut self, check: impl HealthCheck<T>) -> Self {
        self.health_check = Arc::new(check);
        self
    }

    /// Set the disposer
    pub fn with_disposer(mut self, disposer: impl Disposer<T>) -> Self {
        self.disposer = Arc::new(disposer);
        self
    }

    /// Set the scheduler used for lease grants, retries, health checks and disposal
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl<T> PoolConfiguration<T> {
    /// Reject configurations the pool cannot run with
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::<u32>::new().with_max_pool_size(0);
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_pool_size == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_pool_size must be greater than 0".to_string(),
            ));
        }
        if self.checkout_retry_interval.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "checkout_retry_interval must be greater than 0".to_string(),
            ));
        }
        if self.idle_sweep_interval.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "idle_sweep_interval must be greater than 0".to_string(),
            ));
        }
        if let Some(scheduler) = &self.scheduler
            && scheduler.runs_inline()
        {
            return Err(PoolError::InvalidConfiguration(
                "scheduler must not run work inline on the caller's stack".to_string(),
            ));
        }
        Ok(())
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy::new(self.idle_time_before_health_check, self.max_idle_time)
    }
}

impl<T> Clone for PoolConfiguration<T> {
    fn clone(&self) -> Self {
        Self {
            max_pool_size: self.max_pool_size,
            idle_time_before_health_check: self.idle_time_before_health_check,
            max_idle_time: self.max_idle_time,
            checkout_retry_interval: self.checkout_retry_interval,
            return_to_pool_delay_after_health_check_failure: self
                .return_to_pool_delay_after_health_check_failure,
            idle_sweep_interval: self.idle_sweep_interval,
            health_check: Arc::clone(&self.health_check),
            disposer: Arc::clone(&self.disposer),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T> fmt::Debug for PoolConfiguration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfiguration")
            .field("max_pool_size", &self.max_pool_size)
            .field(
                "idle_time_before_health_check",
                &self.idle_time_before_health_check,
            )
            .field("max_idle_time", &self.max_idle_time)
            .field("checkout_retry_interval", &self.checkout_retry_interval)
            .field(
                "return_to_pool_delay_after_health_check_failure",
                &self.return_to_pool_delay_after_health_check_failure,
            )
            .field("idle_sweep_interval", &self.idle_sweep_interval)
            .field("custom_scheduler", &self.scheduler.is_some())
            .finish_non_exhaustive()
    }
}
