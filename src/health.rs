//! Connection health checks and pool health reporting

use async_trait::async_trait;

use crate::errors::BoxError;

/// Decides whether an idle connection is still usable before it is re-leased
///
/// The pool only consults the check for members that have been idle longer
/// than `idle_time_before_health_check`. Returning `Err` is treated the same
/// as returning `Ok(false)`.
///
/// Any `Fn(&T) -> bool` closure is a health check:
///
/// ```
/// use esox_connpool::PoolConfiguration;
///
/// let config = PoolConfiguration::<Vec<u8>>::new()
///     .with_health_check(|conn: &Vec<u8>| !conn.is_empty());
/// ```
#[async_trait]
pub trait HealthCheck<T>: Send + Sync + 'static {
    async fn is_healthy(&self, conn: &mut T) -> Result<bool, BoxError>;
}

#[async_trait]
impl<T, F> HealthCheck<T> for F
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    async fn is_healthy(&self, conn: &mut T) -> Result<bool, BoxError> {
        Ok((self)(&*conn))
    }
}

/// Default health check: every connection is healthy
pub(crate) fn always_healthy<T>(_conn: &T) -> bool {
    true
}

/// Health status of a connection pool
///
/// # Examples
///
/// ```
/// use esox_connpool::HealthStatus;
///
/// let health = HealthStatus::new(3, 1, 0, 5);
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_connections, 3);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Leased connections relative to capacity (0.0 to 1.0)
    pub utilization: f64,

    /// Idle connections ready to be leased
    pub idle_connections: usize,

    /// Connections currently leased
    pub leased_connections: usize,

    /// Checkouts waiting for a connection
    pub pending_checkouts: usize,

    /// Maximum pool size
    pub total_capacity: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub fn new(idle: usize, leased: usize, pending: usize, capacity: usize) -> Self {
        let utilization = if capacity > 0 {
            leased as f64 / capacity as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        // Callers are queued behind an exhausted pool
        if pending > 0 {
            warnings.push(format!("{} checkout(s) waiting for a connection", pending));
            is_healthy = false;
        }

        if idle == 0 && capacity > 0 {
            warnings.push("No idle connections".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_connections: idle,
            leased_connections: leased,
            pending_checkouts: pending,
            total_capacity: capacity,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_health_check() {
        let check = |conn: &String| conn.starts_with("ok");
        let mut good = String::from("ok:1");
        let mut bad = String::from("broken");

        assert!(HealthCheck::<String>::is_healthy(&check, &mut good).await.unwrap());
        assert!(!HealthCheck::<String>::is_healthy(&check, &mut bad).await.unwrap());
    }

    #[test]
    fn test_high_utilization_is_unhealthy() {
        let health = HealthStatus::new(0, 5, 0, 5);
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 2);
        assert!((health.utilization - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pending_checkouts_are_reported() {
        let health = HealthStatus::new(1, 2, 3, 10);
        assert!(!health.is_healthy());
        assert!(health.warnings.iter().any(|w| w.contains("3 checkout")));
    }

    #[test]
    fn test_zero_capacity() {
        let health = HealthStatus::new(0, 0, 0, 0);
        assert!(health.is_healthy());
        assert_eq!(health.utilization, 0.0);
    }
}
