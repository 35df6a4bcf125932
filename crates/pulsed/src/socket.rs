//! Unix-socket event broadcast.
//!
//! Every connecting client is greeted with `daemon:ready`, then receives
//! each bus event verbatim as one JSON line. Clients are read-only
//! observers: anything they send is read and discarded. A write failure
//! silently drops that client from the broadcast set without affecting
//! the others or the tick loop.

#[cfg(unix)]
use crate::bus::EventBus;
#[cfg(unix)]
use pulse_core::events::DaemonEvent;
#[cfg(unix)]
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::sync::Arc;
#[cfg(unix)]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(unix)]
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
#[cfg(unix)]
use tokio_util::sync::CancellationToken;
#[cfg(unix)]
use tracing::{debug, info, warn};

/// Serve the event stream until the token is cancelled, then remove the
/// socket file.
#[cfg(unix)]
pub async fn serve(
    path: PathBuf,
    bus: Arc<EventBus>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = bind_listener(&path)?;
    restrict_socket_mode(&path);
    info!(socket = %path.display(), "socket server listening");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let bus = Arc::clone(&bus);
                    tokio::spawn(handle_client(stream, bus));
                }
                Err(err) => {
                    warn!(error = %err, "socket accept failed");
                }
            },
        }
    }

    let _ = std::fs::remove_file(&path);
    info!("socket server stopped");
    Ok(())
}

#[cfg(not(unix))]
pub async fn serve(
    _path: std::path::PathBuf,
    _bus: std::sync::Arc<crate::bus::EventBus>,
    shutdown: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    shutdown.cancelled().await;
    Ok(())
}

/// Bind, replacing a stale socket file only when no live daemon answers
/// on it.
#[cfg(unix)]
fn bind_listener(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("daemon already listening at {}", path.display()),
            ));
        }
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

/// The socket file is the trust boundary: owner-only access.
#[cfg(unix)]
fn restrict_socket_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(error = %err, "failed to restrict socket permissions");
    }
}

#[cfg(unix)]
async fn handle_client(stream: UnixStream, bus: Arc<EventBus>) {
    let (mut reader, mut writer) = stream.into_split();
    let (subscription, mut events) = bus.subscribe();

    let ready = DaemonEvent::DaemonReady {
        pid: std::process::id(),
    };
    if write_event(&mut writer, &ready).await.is_err() {
        bus.unsubscribe(subscription);
        return;
    }
    debug!("watcher connected");

    let mut sink = [0u8; 1024];
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if write_event(&mut writer, &event).await.is_err() {
                        // Slow or dead client: drop it, never block others.
                        break;
                    }
                }
                None => break,
            },
            read = reader.read(&mut sink) => match read {
                // Clients are read-only observers; their bytes are ignored.
                Ok(n) if n > 0 => {}
                _ => break,
            },
        }
    }

    bus.unsubscribe(subscription);
    debug!("watcher disconnected");
}

#[cfg(unix)]
async fn write_event(writer: &mut OwnedWriteHalf, event: &DaemonEvent) -> std::io::Result<()> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}
