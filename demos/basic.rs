//! Basic example of using graph-ha.

use graph_ha::{ConnectionPool, HostAddress, PoolConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Create a pool over two graph servers
    let addresses: Vec<HostAddress> = vec!["127.0.0.1:9669".parse()?, "127.0.0.1:9670".parse()?];
    let config = PoolConfig::default()
        .with_timeout(Duration::from_secs(3))
        .with_pool_size(1, 4)
        .with_health_check_interval(Duration::from_secs(30));
    let pool = ConnectionPool::connect(&addresses, config).await?;

    // Get a session
    let session = pool.get_session("root", "nebula").await?;
    println!("Session {} on {:?}", session.session_id(), session.server_address().await);

    // Execute a simple statement
    let result = session.execute("YIELD 1 AS value").await?;
    println!("Columns: {:?}", result.columns);
    println!("Rows: {}", result.row_count());

    // A query error leaves the session usable
    if let Err(e) = session.execute("GO FROM").await {
        println!("Query failed: {}", e);
    }

    println!(
        "Active: {}, idle: {}, max: {}",
        pool.active_conn_count(),
        pool.idle_conn_count(),
        pool.config().max_conn_pool_size
    );

    // Release the session and close the pool
    session.release().await?;
    pool.close().await?;

    Ok(())
}
