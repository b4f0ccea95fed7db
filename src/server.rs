//! TCP listener for the memcached text protocol

use crate::config::ServerConfig;
use crate::service::Service;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Accept loop: enforces the connection cap and hands every accepted
/// socket to the service.
pub struct Server {
    config: ServerConfig,
    service: Arc<Service>,
    connection_semaphore: Arc<Semaphore>,
    cancel_token: CancellationToken,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        service: Arc<Service>,
        cancel_token: CancellationToken,
    ) -> Self {
        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

        Self {
            config,
            service,
            connection_semaphore,
            cancel_token,
        }
    }

    /// Run the accept loop until cancellation.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.config.listen_addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", addr);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            // Disable Nagle's algorithm for lower latency
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY: {}", e);
                            }

                            match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => {
                                    debug!("Accepted connection from {}", peer_addr);

                                    let service = Arc::clone(&self.service);
                                    tokio::spawn(async move {
                                        let mut stream = stream;
                                        service.serve_connection(&mut stream).await;
                                        drop(permit);
                                        debug!("Connection from {} closed", peer_addr);
                                    });
                                }
                                Err(_) => {
                                    // Connection limit reached
                                    warn!("Connection limit reached, rejecting connection from {}", peer_addr);
                                    drop(stream);
                                }
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
