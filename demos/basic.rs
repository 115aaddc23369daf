//! Basic usage examples for ConnectionPool

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use esox_connpool::{ConnectionPool, PoolConfiguration};

#[derive(Debug)]
struct FakeConnection {
    session: usize,
}

impl FakeConnection {
    fn query(&self, sql: &str) -> String {
        format!("session {} ran `{}`", self.session, sql)
    }
}

fn pool_with_size(size: usize) -> ConnectionPool<FakeConnection> {
    let sessions = Arc::new(AtomicUsize::new(0));
    ConnectionPool::new(
        move || {
            let sessions = Arc::clone(&sessions);
            async move {
                let session = sessions.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, std::io::Error>(FakeConnection { session })
            }
        },
        PoolConfiguration::new()
            .with_max_pool_size(size)
            .with_health_check(|conn: &FakeConnection| conn.session > 0)
            .with_disposer(|conn: FakeConnection| println!("   Closed session {}", conn.session)),
    )
    .expect("valid configuration")
}

#[tokio::main]
async fn main() {
    println!("=== EsoxSolutions.ConnectionPool - Basic Examples ===\n");

    // Example 1: Lease and return
    simple_lease().await;

    // Example 2: Waiting for a connection
    waiting_checkout().await;

    // Example 3: Discarding a broken connection
    discard_connection().await;

    // Example 4: Metrics and health
    metrics_and_health().await;
}

async fn simple_lease() {
    println!("1. Lease and Return:");
    let pool = pool_with_size(3);

    {
        let conn = pool.member().await.unwrap();
        println!("   {}", conn.query("SELECT 1"));
        // Connection automatically returned when dropped
    }

    println!("   Idle after return: {}\n", pool.idle_count());
    pool.close();
}

async fn waiting_checkout() {
    println!("2. Waiting Checkout:");
    let pool = pool_with_size(1);

    let held = pool.member().await.unwrap();
    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move {
            let conn = pool.member().await.unwrap();
            conn.query("SELECT now()")
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("   Pending checkouts: {}", pool.pending_count());
    held.release();

    println!("   {}\n", waiter.await.unwrap());
    pool.close();
}

async fn discard_connection() {
    println!("3. Discard:");
    let pool = pool_with_size(1);

    let conn = pool.member().await.unwrap();
    println!("   Discarding session {}", conn.session);
    conn.discard();

    let conn = pool.member().await.unwrap();
    println!("   Replacement is session {}\n", conn.session);
    drop(conn);
    pool.close();
}

async fn metrics_and_health() {
    println!("4. Metrics and Health:");
    let pool = pool_with_size(4);

    let a = pool.member().await.unwrap();
    let b = pool.member().await.unwrap();

    let health = pool.health_status();
    println!("   Healthy: {}", health.is_healthy());
    println!("   Utilization: {:.1}%", health.utilization * 100.0);
    for warning in &health.warnings {
        println!("   Warning: {}", warning);
    }

    drop(a);
    drop(b);

    let metrics = pool.metrics();
    println!("   Connections created: {}", metrics.connections_created);
    println!("   Leases granted: {}", metrics.leases_granted);

    println!("\n   Prometheus export:");
    print!("{}", pool.export_metrics_prometheus("demo", None));
    pool.close();
}
