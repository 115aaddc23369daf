//! Exhausted pool, checkout retries and health-checked reuse

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use esox_connpool::{ConnectionPool, PoolConfiguration, PoolError, TokioScheduler};

#[tokio::main]
async fn main() {
    println!("=== EsoxSolutions.ConnectionPool - Retry Examples ===\n");

    exhausted_pool().await;
    health_checked_reuse().await;
}

async fn exhausted_pool() {
    println!("1. Exhausted Pool:");
    let config = PoolConfiguration::new()
        .with_max_pool_size(2)
        .with_checkout_retry_interval(Duration::from_millis(100));
    let pool = ConnectionPool::new(|| async { Ok::<_, std::io::Error>(()) }, config).unwrap();

    let first = pool.member().await.unwrap();
    let second = pool.member().await.unwrap();

    match pool.member_with_timeout(Duration::from_millis(350)).await {
        Err(PoolError::Timeout(after)) => println!("   Gave up after {:?}", after),
        other => println!("   Unexpected: {:?}", other.map(|lease| lease.id())),
    }
    println!("   Retries scheduled: {}", pool.metrics().checkout_retries);

    drop(first);
    drop(second);
    let lease = pool.member().await.unwrap();
    println!("   Reused connection #{}\n", lease.id());
    drop(lease);
    pool.close();
}

async fn health_checked_reuse() {
    println!("2. Health Checks:");
    let healthy = Arc::new(AtomicBool::new(true));
    let probe = Arc::clone(&healthy);

    let config = PoolConfiguration::new()
        .with_max_pool_size(1)
        .with_idle_time_before_health_check(Duration::from_millis(50))
        .with_return_to_pool_delay_after_health_check_failure(Duration::from_millis(200))
        .with_health_check(move |_: &u32| probe.load(Ordering::SeqCst))
        .with_scheduler(Arc::new(TokioScheduler::current().unwrap()));
    let pool = ConnectionPool::new(|| async { Ok::<_, std::io::Error>(7u32) }, config).unwrap();

    pool.member().await.unwrap().release();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let lease = pool.member().await.unwrap();
    println!("   Passed health check, reused #{}", lease.id());
    lease.release();

    healthy.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    let lease = pool.member().await.unwrap();
    println!(
        "   Failed health check, got fresh #{} after {:?}",
        lease.id(),
        started.elapsed()
    );

    let metrics = pool.metrics();
    println!(
        "   Health checks: {} performed, {} failed",
        metrics.health_checks_performed, metrics.health_checks_failed
    );
    drop(lease);
    pool.close();
}
