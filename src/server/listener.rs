use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tracing::{error, info, warn, Instrument};

use crate::config::Settings;
use crate::files::StaticFileServer;
use crate::http::connection::Connection;

/// Accept backlog for each worker's listening socket.
pub const LISTEN_BACKLOG: i32 = 1024;

/// Pause before accepting again when the process is out of descriptors.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Binds a listening socket that other processes may bind to as well.
///
/// Both SO_REUSEADDR and SO_REUSEPORT are set, so every worker gets its own
/// socket on the same address and the kernel spreads connections across them.
pub fn bind_shared(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Errors after which the listener can no longer produce connections.
pub fn is_fatal_accept_error(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EBADF)
            | Some(libc::ENOTSOCK)
            | Some(libc::EINVAL)
            | Some(libc::EOPNOTSUPP)
            | Some(libc::ENETUNREACH)
            | Some(libc::ENETDOWN)
            | Some(libc::ENOTCONN)
    ) || e.kind() == io::ErrorKind::NotConnected
}

/// Out of file descriptors. The pending connection stays queued, so an
/// immediate retry would fail again.
pub fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

/// Accepts connections forever, handling each one to completion before the
/// next accept. Returns only on a fatal listener error.
pub async fn serve(listener: TcpListener, files: &StaticFileServer) -> io::Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) if is_fatal_accept_error(&e) => {
                error!(error = %e, "Listener failed, leaving accept loop");
                return Err(e);
            }
            Err(e) if is_descriptor_exhaustion(&e) => {
                warn!(error = %e, backoff = ?ACCEPT_BACKOFF, "Accept failed, backing off");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Accept failed, continuing");
                continue;
            }
        };

        tracing::debug!(peer = %peer, "Accepted connection");

        if let Err(e) = Connection::new(socket, files).run().await {
            error!(peer = %peer, "Connection error: {:#}", e);
        }
    }
}

/// Entry point of a forked worker process.
///
/// Builds a single-threaded runtime, binds the shared socket and runs the
/// accept loop on it. Nothing is spawned, so one request at a time is served.
pub fn run_worker(index: usize, settings: &Settings) -> anyhow::Result<()> {
    let span = tracing::info_span!("worker", index, pid = std::process::id());
    let _enter = span.enter();

    let addr: SocketAddr = settings
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid listen address {}", settings.bind_addr()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .context("failed to build worker runtime")?;

    let files = StaticFileServer::new(settings.root_path.clone());

    runtime.block_on(
        async {
            let std_listener = bind_shared(addr)
                .with_context(|| format!("failed to bind {}", addr))?;
            let listener = TcpListener::from_std(std_listener)?;

            info!(addr = %addr, root = %files.root(), "Worker listening");

            serve(listener, &files).await?;
            Ok::<(), anyhow::Error>(())
        }
        .in_current_span(),
    )
}
