//! Socket client for watching a running daemon.
//!
//! Reconstructs the NDJSON event stream with the same partial-line
//! buffering discipline as the daemon's own stream parsers, and
//! synthesizes a local `daemon:shutdown` if the socket closes without
//! one, so a UI sees the same vocabulary either way.

use pulse_core::events::DaemonEvent;
use pulse_core::stream::LineBuffer;
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {path}\n  → start it with: pulsed\n  → or pass --data-dir if it uses a different data directory")]
    Connect { path: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A live event stream from the daemon socket.
#[derive(Debug)]
pub struct EventStream {
    stream: UnixStream,
    lines: LineBuffer,
    pending: VecDeque<DaemonEvent>,
    saw_shutdown: bool,
    closed: bool,
}

/// Connect to the daemon's socket.
pub async fn connect(socket_path: &Path) -> Result<EventStream, ClientError> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|_| ClientError::Connect {
            path: socket_path.display().to_string(),
        })?;
    Ok(EventStream::new(stream))
}

impl EventStream {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            lines: LineBuffer::new(),
            pending: VecDeque::new(),
            saw_shutdown: false,
            closed: false,
        }
    }

    /// Next event, or `None` once the stream has ended after a shutdown.
    ///
    /// An unexpected close (EOF or read error without a prior
    /// `daemon:shutdown`) synthesizes one local shutdown event first.
    pub async fn next_event(&mut self) -> Option<DaemonEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if matches!(event, DaemonEvent::DaemonShutdown) {
                    self.saw_shutdown = true;
                }
                return Some(event);
            }
            if self.closed {
                return None;
            }

            let mut buf = [0u8; 4096];
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    self.closed = true;
                    if self.saw_shutdown {
                        return None;
                    }
                    self.saw_shutdown = true;
                    return Some(DaemonEvent::DaemonShutdown);
                }
                Ok(n) => {
                    for line in self.lines.push(&buf[..n]) {
                        match serde_json::from_str(&line) {
                            Ok(event) => self.pending.push_back(event),
                            Err(err) => {
                                debug!(line, error = %err, "skipping unparseable event line");
                            }
                        }
                    }
                }
            }
        }
    }
}
