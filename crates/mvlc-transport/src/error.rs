use std::io::ErrorKind;

/// Errors that can occur on a controller pipe.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the local socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the controller.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The per-call read or write timeout elapsed without any data.
    #[error("pipe operation timed out")]
    Timeout,

    /// The remote side went away or the pipe was closed locally.
    #[error("pipe disconnected")]
    Disconnected,

    /// An I/O error occurred on the underlying socket or stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Classify an I/O error into the pipe error kinds callers act upon.
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => TransportError::Disconnected,
            _ => TransportError::Io(err),
        }
    }

    /// True for the timeout signal that transaction retries key on.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
