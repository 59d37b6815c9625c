use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::controller::{Role, Transport, TransportConfig};
use crate::error::{Result, TransportError};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// How a client retries a refused connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait between attempts.
    pub interval: Duration,
    /// Give up after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts: Some(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// TCP listener that hands out exactly one peer connection.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind and listen.
    ///
    /// Binding port 0 picks an ephemeral port; see [`Listener::local_addr`].
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening for peer");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept the single peer (blocking).
    ///
    /// The listener moves into the returned transport; it stays open until
    /// the transport switches to UDP or closes.
    pub fn accept(self, config: TransportConfig) -> Result<Transport> {
        let (stream, peer_addr) = self.listener.accept().map_err(TransportError::Accept)?;
        info!(%peer_addr, "accepted peer connection");
        configure_stream(&stream, &config)?;
        Ok(Transport::from_tcp(
            Role::Server,
            Some(self.listener),
            stream,
            self.local_addr,
            peer_addr,
            config,
        ))
    }
}

/// Connect once.
pub fn connect(remote: SocketAddr, config: TransportConfig) -> Result<Transport> {
    let stream = TcpStream::connect_timeout(&remote, config.connect_timeout)
        .map_err(|source| TransportError::Connect {
            addr: remote,
            source,
        })?;
    configure_stream(&stream, &config)?;
    let local_addr = stream.local_addr()?;
    info!(%remote, %local_addr, "connected to peer");
    Ok(Transport::from_tcp(
        Role::Client,
        None,
        stream,
        local_addr,
        remote,
        config,
    ))
}

/// Connect, retrying refused attempts per `policy`.
///
/// Errors other than a refusal are returned immediately.
pub fn connect_with_retry(
    remote: SocketAddr,
    config: TransportConfig,
    policy: &RetryPolicy,
) -> Result<Transport> {
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        match connect(remote, config.clone()) {
            Ok(transport) => return Ok(transport),
            Err(TransportError::Connect { source, .. }) if is_refusal(&source) => {
                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(TransportError::Refused {
                        addr: remote,
                        attempts,
                    });
                }
                warn!(
                    %remote,
                    attempts,
                    retry_in = ?policy.interval,
                    "connection refused, retrying"
                );
                std::thread::sleep(policy.interval);
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_refusal(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::TimedOut | ErrorKind::ConnectionReset
    )
}

fn configure_stream(stream: &TcpStream, config: &TransportConfig) -> Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(config.read_timeout)?;
    stream.set_write_timeout(config.write_timeout)?;
    Ok(())
}

/// Read exactly `expected` bytes, keeping partial progress in `pending`
/// across read timeouts.
pub(crate) fn read_exact_pending(
    stream: &mut TcpStream,
    pending: &mut BytesMut,
    expected: usize,
) -> Result<Bytes> {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    while pending.len() < expected {
        let want = (expected - pending.len()).min(READ_CHUNK_SIZE);
        match stream.read(&mut chunk[..want]) {
            Ok(0) => {
                if pending.is_empty() {
                    return Err(TransportError::ConnectionReset);
                }
                let actual = pending.len();
                pending.clear();
                debug!(expected, actual, "peer closed mid-message");
                return Err(TransportError::ShortRead { expected, actual });
            }
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransportError::from_io(err)),
        }
    }
    Ok(pending.split_to(expected).freeze())
}

/// Write all of `bytes` within `timeout`.
///
/// A write that stalls before any byte leaves is a plain timeout. Once part
/// of a message is out the stream is no longer frame-aligned, so a stall
/// after that shuts the stream down and reports a reset.
pub(crate) fn write_all(
    stream: &mut TcpStream,
    bytes: &[u8],
    timeout: Option<Duration>,
) -> Result<()> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let mut offset = 0usize;
    while offset < bytes.len() {
        if offset > 0 && deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(abandon_partial_write(stream, offset, bytes.len()));
        }
        match stream.write(&bytes[offset..]) {
            Ok(0) => return Err(TransportError::ConnectionReset),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err)
                if offset > 0
                    && matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                return Err(abandon_partial_write(stream, offset, bytes.len()));
            }
            Err(err) => return Err(TransportError::from_io(err)),
        }
    }
    Ok(())
}

fn abandon_partial_write(stream: &TcpStream, written: usize, total: usize) -> TransportError {
    warn!(written, total, "write stalled mid-message, dropping connection");
    let _ = stream.shutdown(Shutdown::Both);
    TransportError::ConnectionReset
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn bind_accept_connect() {
        let listener = Listener::bind(loopback()).unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);

        let client = thread::spawn(move || {
            let mut transport = connect(addr, TransportConfig::default()).unwrap();
            transport.write(b"hello").unwrap();
            transport
        });

        let mut server = listener.accept(TransportConfig::default()).unwrap();
        assert_eq!(server.role(), Role::Server);
        assert_eq!(server.read(5).unwrap().as_ref(), b"hello");
        drop(client.join().unwrap());
    }

    #[test]
    fn refused_after_max_attempts() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind(loopback()).unwrap();
            listener.local_addr().unwrap()
        };

        let policy = RetryPolicy::default()
            .with_interval(Duration::from_millis(10))
            .with_max_attempts(Some(3));
        let err = connect_with_retry(addr, TransportConfig::default(), &policy).unwrap_err();
        assert!(matches!(err, TransportError::Refused { attempts: 3, .. }));
    }

    #[test]
    fn retry_succeeds_once_listener_appears() {
        let addr = {
            let listener = TcpListener::bind(loopback()).unwrap();
            listener.local_addr().unwrap()
        };

        let server = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let listener = Listener::bind(addr).unwrap();
            listener.accept(TransportConfig::default()).unwrap()
        });

        let policy = RetryPolicy::default()
            .with_interval(Duration::from_millis(25))
            .with_max_attempts(Some(200));
        let client = connect_with_retry(addr, TransportConfig::default(), &policy).unwrap();
        assert_eq!(client.role(), Role::Client);
        drop(server.join().unwrap());
    }
}
