//! # EsoxSolutions.ConnectionPool
//!
//! Non-blocking database connection pool for Rust, built on tokio.
//!
//! ## Features
//!
//! - Checkouts never block a thread: [`ConnectionPool::member`] returns a future
//! - Bounded pool size with FIFO queueing once the pool is exhausted
//! - Periodic checkout retry while the pool stays exhausted
//! - Health checks for connections that sat idle too long
//! - Idle eviction, both on access and from a background sweep
//! - Best-effort disposal of evicted connections
//! - Automatic return of leases via RAII (Drop trait)
//! - Health status, metrics and Prometheus export
//!
//! Every lease grant, retry, health check and disposal runs as its own task
//! on the pool's [`Scheduler`], so releasing a connection and immediately
//! checking out another never grows the caller's stack.
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_connpool::{ConnectionPool, PoolConfiguration};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = ConnectionPool::new(
//!     || async { Ok::<_, std::io::Error>(String::from("db connection")) },
//!     PoolConfiguration::new(),
//! )
//! .unwrap();
//!
//! {
//!     let conn = pool.member().await.unwrap();
//!     println!("Got: {}", *conn);
//!     // Connection automatically returned when `conn` goes out of scope
//! }
//!
//! pool.close();
//! # }
//! ```

mod config;
mod errors;
mod eviction;
mod health;
mod lease;
mod lifecycle;
mod member;
mod metrics;
mod pool;
mod scheduler;


pub use config::PoolConfiguration;
pub use errors::{BoxError, PoolError, PoolResult};
pub use eviction::{EvictionPolicy, Freshness};
pub use health::{HealthCheck, HealthStatus};
pub use lease::{Checkout, Lease};
pub use lifecycle::{ConnectionFactory, Disposer};
pub use member::MemberState;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::ConnectionPool;
pub use scheduler::{ScheduledTask, Scheduler, Task, TokioScheduler};
