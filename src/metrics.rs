//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Metrics snapshot for a pool
///
/// # Examples
///
/// ```
/// use esox_connpool::{ConnectionPool, PoolConfiguration};
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = ConnectionPool::new(
///     || async { Ok::<_, std::io::Error>(0u32) },
///     PoolConfiguration::new(),
/// )
/// .unwrap();
///
/// let lease = pool.member().await.unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.connections_created, 1);
/// assert_eq!(metrics.leased_connections, 1);
/// # drop(lease);
/// # }
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Connections opened by the factory
    pub connections_created: u64,

    /// Factory calls that failed
    pub creation_failures: u64,

    /// Connections handed to the disposer
    pub connections_disposed: u64,

    /// Leases granted to callers
    pub leases_granted: u64,

    /// Leases returned to the pool
    pub leases_released: u64,

    /// Leases discarded as broken
    pub leases_discarded: u64,

    /// Health checks run on idle connections
    pub health_checks_performed: u64,

    /// Health checks that failed or errored
    pub health_checks_failed: u64,

    /// Idle connections evicted for exceeding the maximum idle time
    pub idle_evictions: u64,

    /// Times the pool was exhausted and a checkout retry was scheduled
    pub checkout_retries: u64,

    /// Current idle connections
    pub idle_connections: usize,

    /// Current leased connections
    pub leased_connections: usize,

    /// Current waiting checkouts
    pub pending_checkouts: usize,

    /// Pool utilization ratio (0.0 to 1.0)
    pub utilization: f64,

    /// Maximum pool size
    pub max_capacity: usize,

    /// Time since the pool was created
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("connections_created".to_string(), self.connections_created.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("connections_disposed".to_string(), self.connections_disposed.to_string());
        metrics.insert("leases_granted".to_string(), self.leases_granted.to_string());
        metrics.insert("leases_released".to_string(), self.leases_released.to_string());
        metrics.insert("leases_discarded".to_string(), self.leases_discarded.to_string());
        metrics.insert("health_checks_performed".to_string(), self.health_checks_performed.to_string());
        metrics.insert("health_checks_failed".to_string(), self.health_checks_failed.to_string());
        metrics.insert("idle_evictions".to_string(), self.idle_evictions.to_string());
        metrics.insert("checkout_retries".to_string(), self.checkout_retries.to_string());
        metrics.insert("idle_connections".to_string(), self.idle_connections.to_string());
        metrics.insert("leased_connections".to_string(), self.leased_connections.to_string());
        metrics.insert("pending_checkouts".to_string(), self.pending_checkouts.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        metrics
    }

    /// Fraction of health checks that passed (1.0 when none ran)
    pub fn health_check_success_rate(&self) -> f64 {
        if self.health_checks_performed == 0 {
            return 1.0;
        }
        let passed = self.health_checks_performed - self.health_checks_failed;
        passed as f64 / self.health_checks_performed as f64
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::{ConnectionPool, PoolConfiguration};
    /// use std::collections::HashMap;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let pool = ConnectionPool::new(
    ///     || async { Ok::<_, std::io::Error>(0u32) },
    ///     PoolConfiguration::new(),
    /// )
    /// .unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("orders_db", Some(&tags));
    /// assert!(output.contains("connpool_connections_leased"));
    /// assert!(output.contains("service=\"api\""));
    /// # }
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        // Gauge metrics
        Self::write_metric(&mut output, "connpool_connections_leased", "gauge", "Current leased connections", &labels, metrics.leased_connections);
        Self::write_metric(&mut output, "connpool_connections_idle", "gauge", "Current idle connections", &labels, metrics.idle_connections);
        Self::write_metric(&mut output, "connpool_checkouts_pending", "gauge", "Checkouts waiting for a connection", &labels, metrics.pending_checkouts);
        Self::write_metric(&mut output, "connpool_utilization", "gauge", "Pool utilization ratio", &labels, format!("{:.2}", metrics.utilization));

        // Counter metrics
        Self::write_metric(&mut output, "connpool_connections_created_total", "counter", "Connections opened", &labels, metrics.connections_created);
        Self::write_metric(&mut output, "connpool_creation_failures_total", "counter", "Failed connection attempts", &labels, metrics.creation_failures);
        Self::write_metric(&mut output, "connpool_connections_disposed_total", "counter", "Connections disposed", &labels, metrics.connections_disposed);
        Self::write_metric(&mut output, "connpool_leases_granted_total", "counter", "Leases granted", &labels, metrics.leases_granted);
        Self::write_metric(&mut output, "connpool_leases_released_total", "counter", "Leases released", &labels, metrics.leases_released);
        Self::write_metric(&mut output, "connpool_leases_discarded_total", "counter", "Leases discarded", &labels, metrics.leases_discarded);
        Self::write_metric(&mut output, "connpool_health_checks_total", "counter", "Health checks performed", &labels, metrics.health_checks_performed);
        Self::write_metric(&mut output, "connpool_health_checks_failed_total", "counter", "Health checks failed", &labels, metrics.health_checks_failed);
        Self::write_metric(&mut output, "connpool_idle_evictions_total", "counter", "Idle connections evicted", &labels, metrics.idle_evictions);
        Self::write_metric(&mut output, "connpool_checkout_retries_total", "counter", "Checkout retries scheduled", &labels, metrics.checkout_retries);

        output
    }

    fn write_metric(
        output: &mut String,
        name: &str,
        kind: &str,
        help: &str,
        labels: &str,
        value: impl std::fmt::Display,
    ) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} {}\n", name, kind));
        output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", Self::escape_label_value(pool_name))];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, Self::escape_label_value(value)));
            }
        }

        labels.join(",")
    }

    /// Backslash, double quote and line feed must be escaped in label values
    fn escape_label_value(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '"' => escaped.push_str("\\\""),
                '\n' => escaped.push_str("\\n"),
                _ => escaped.push(c),
            }
        }
        escaped
    }
}

/// Internal metrics tracker
#[derive(Debug)]
pub(crate) struct MetricsTracker {
    pub connections_created: AtomicU64,
    pub creation_failures: AtomicU64,
    pub connections_disposed: AtomicU64,
    pub leases_granted: AtomicU64,
    pub leases_released: AtomicU64,
    pub leases_discarded: AtomicU64,
    pub health_checks_performed: AtomicU64,
    pub health_checks_failed: AtomicU64,
    pub idle_evictions: AtomicU64,
    pub checkout_retries: AtomicU64,
    created_at: Instant,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            connections_created: AtomicU64::new(0),
            creation_failures: AtomicU64::new(0),
            connections_disposed: AtomicU64::new(0),
            leases_granted: AtomicU64::new(0),
            leases_released: AtomicU64::new(0),
            leases_discarded: AtomicU64::new(0),
            health_checks_performed: AtomicU64::new(0),
            health_checks_failed: AtomicU64::new(0),
            idle_evictions: AtomicU64::new(0),
            checkout_retries: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(
        &self,
        idle: usize,
        leased: usize,
        pending: usize,
        capacity: usize,
    ) -> PoolMetrics {
        let utilization = if capacity > 0 {
            leased as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            connections_disposed: self.connections_disposed.load(Ordering::Relaxed),
            leases_granted: self.leases_granted.load(Ordering::Relaxed),
            leases_released: self.leases_released.load(Ordering::Relaxed),
            leases_discarded: self.leases_discarded.load(Ordering::Relaxed),
            health_checks_performed: self.health_checks_performed.load(Ordering::Relaxed),
            health_checks_failed: self.health_checks_failed.load(Ordering::Relaxed),
            idle_evictions: self.idle_evictions.load(Ordering::Relaxed),
            checkout_retries: self.checkout_retries.load(Ordering::Relaxed),
            idle_connections: idle,
            leased_connections: leased,
            pending_checkouts: pending,
            utilization,
            max_capacity: capacity,
            uptime: self.created_at.elapsed(),
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
