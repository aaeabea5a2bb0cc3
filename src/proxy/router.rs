//! TCP front end of the hash router.
//!
//! Nothing is proxied: each client gets one line naming the backend its
//! address hashes to, then the connection is closed.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::config::RouterConfig;
use crate::proxy::backend::BackendSelector;

pub async fn run(cfg: &RouterConfig) -> anyhow::Result<()> {
    let selector = BackendSelector::new(cfg.backends.clone())
        .context("router configuration rejected")?;

    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen_addr))?;
    info!(addr = %cfg.listen_addr, backends = selector.len(), "Router listening");

    serve(listener, Arc::new(selector)).await
}

pub async fn serve(listener: TcpListener, selector: Arc<BackendSelector>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;

        let selector = selector.clone();
        tokio::spawn(async move {
            if let Err(e) = reply(socket, &peer.ip().to_string(), &selector).await {
                error!("Router connection error from {}: {}", peer, e);
            }
        });
    }
}

async fn reply(mut socket: TcpStream, client: &str, selector: &BackendSelector) -> std::io::Result<()> {
    let message = selector.route_message(client);
    info!(client, backend = selector.select(client).display_name(), "Routing client");

    socket.write_all(message.as_bytes()).await?;
    socket.shutdown().await
}
