use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use workerpool::pool::{Config, Pool};
use workerpool::server::SubmitServer;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "workerpool=debug".into()),
        )
        .init();

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8888".into());
    // Request handling is I/O-light, so a couple of workers per core is
    // plenty; saturated submits are answered busy rather than queued.
    let capacity = num_cpus::get() * 2;
    let pool = Arc::new(Pool::with_config(
        capacity,
        Config {
            pre_alloc: true,
            block: false,
        },
    ));

    let listener = TcpListener::bind(&addr).await?;
    let server = Arc::new(SubmitServer::new(Arc::clone(&pool)));
    let metrics = server.metrics();

    tokio::select! {
        res = Arc::clone(&server).serve(listener) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    info!(snapshot = ?metrics.snapshot(), "draining worker pool");
    let _ = tokio::task::spawn_blocking(move || pool.free()).await;
    info!("bye");
    Ok(())
}
