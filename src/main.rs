// EsoxSolutions.ConnectionPool - Rust Port
// Non-blocking database connection pool built on tokio
// Version 1.0.0

// This is just a binary wrapper - the actual library is in lib.rs
// Run demos with: cargo run --example basic

use esox_connpool::{ConnectionPool, PoolConfiguration, PoolResult};

#[tokio::main]
async fn main() -> PoolResult<()> {
    println!("=== EsoxSolutions.ConnectionPool v1.0.0 ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let pool = ConnectionPool::new(
        || async { Ok::<_, std::io::Error>(String::from("postgres://localhost/app")) },
        PoolConfiguration::new().with_max_pool_size(2),
    )?;

    {
        let conn = pool.member().await?;
        println!("  Got connection #{}: {}", conn.id(), *conn);
    }

    println!("  Idle after return: {}", pool.idle_count());
    pool.close();
    Ok(())
}
