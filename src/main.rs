//! SlateCache - memcached-compatible cache server over RocksDB
//!
//! Speaks the memcached ASCII protocol and keeps the keyspace in a
//! transactional RocksDB store with background expiration.

// Use jemalloc for better multi-threaded performance
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use slatecache::config::Config;
use slatecache::server::Server;
use slatecache::service::Service;
use slatecache::storage::RocksBackend;
use std::sync::Arc;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting SlateCache");

    // Load configuration
    let config = if let Some(config_path) = std::env::args().nth(1) {
        info!("Loading configuration from {}", config_path);
        Config::from_file(&config_path)?
    } else {
        info!("Using default configuration (set SLATECACHE_* env vars to customize)");
        Config::from_env()
    };

    info!("Configuration: {:?}", config);

    // Build tokio runtime with configured worker threads
    let mut runtime_builder = Builder::new_multi_thread();
    if config.server.worker_threads > 0 {
        runtime_builder.worker_threads(config.server.worker_threads);
        info!("Using {} worker threads", config.server.worker_threads);
    } else {
        info!("Using default worker threads (auto-detected)");
    }
    let runtime = runtime_builder.enable_all().build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Initialize storage
    info!("Opening RocksDB at {:?}", config.storage.db_path);
    let backend = Arc::new(
        RocksBackend::open(&config.storage)
            .map_err(|e| anyhow::anyhow!("Failed to open RocksDB: {e}"))?,
    );

    // Create the cache service and start its expiration sweeper
    let service = Service::with_config("memcached", "default", backend, &config.cache);
    service.start();

    let server = Server::new(config.server.clone(), Arc::clone(&service), cancel_token.clone());

    // Setup signal handlers
    let cancel_for_signal = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
            }
            _ = async {
                #[cfg(unix)]
                {
                    use tokio::signal::unix::{signal, SignalKind};
                    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
                    sigterm.recv().await
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<Option<()>>().await
                }
            } => {
                info!("Received SIGTERM, shutting down...");
            }
        }
        cancel_for_signal.cancel();
    });

    // Run the accept loop, then drain the service
    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
    }
    service.stop().await;

    info!("SlateCache stopped");
    Ok(())
}
