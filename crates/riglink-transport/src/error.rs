use std::io;
use std::net::SocketAddr;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    /// The remote kept refusing connections until the retry policy gave up.
    #[error("connection to {addr} refused ({attempts} attempts)")]
    Refused { addr: SocketAddr, attempts: u32 },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(io::Error),

    /// A message arrived incomplete or with the wrong length.
    #[error("short read ({actual} bytes, expected {expected})")]
    ShortRead { expected: usize, actual: usize },

    /// The peer closed or reset the connection.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// No data arrived within the read timeout.
    #[error("read timed out")]
    TimedOut,

    /// The transport has already been switched to UDP.
    #[error("transport already switched to UDP")]
    AlreadySwitched,

    /// No datagram has been received yet, so the peer address is unknown.
    #[error("peer address not known yet")]
    NoPeerAddress,

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,

    /// An I/O error occurred on the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Classify a raw socket error.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::TimedOut,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected => TransportError::ConnectionReset,
            _ => TransportError::Io(err),
        }
    }

    /// True when the error means the connection is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionReset
                | TransportError::ShortRead { .. }
                | TransportError::Refused { .. }
                | TransportError::Closed
        )
    }

    /// True for read timeouts, which only mean "nothing yet".
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::TimedOut)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
