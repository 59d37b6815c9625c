use std::fmt;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::tcp::{self, Listener, RetryPolicy};
use crate::udp::UdpChannel;

/// Which end of the link this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Listens and accepts exactly one peer.
    Server,
    /// Connects, and may reconnect.
    Client,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active transport mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Tcp,
    Udp,
    Closed,
}

impl TransportMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportMode::Tcp => "tcp",
            TransportMode::Udp => "udp",
            TransportMode::Closed => "closed",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Socket configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Read timeout. Reads return [`TransportError::TimedOut`] when it expires.
    pub read_timeout: Option<Duration>,
    /// Write timeout for TCP.
    pub write_timeout: Option<Duration>,
    /// Timeout for a single TCP connect attempt.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_millis(100)),
            write_timeout: Some(Duration::from_secs(1)),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

enum Mode {
    Tcp {
        listener: Option<TcpListener>,
        stream: TcpStream,
    },
    Udp(UdpChannel),
    Closed,
}

/// Owns the link's socket and its TCP to UDP transition.
///
/// Starts in TCP mode (from [`Listener::accept`] or [`tcp::connect`]).
/// [`Transport::switch_to_udp`] is one-way and one-time.
pub struct Transport {
    role: Role,
    mode: Mode,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    config: TransportConfig,
    pending: BytesMut,
    switched: bool,
}

impl Transport {
    pub(crate) fn from_tcp(
        role: Role,
        listener: Option<TcpListener>,
        stream: TcpStream,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        config: TransportConfig,
    ) -> Self {
        Self {
            role,
            mode: Mode::Tcp { listener, stream },
            local_addr,
            remote_addr,
            config,
            pending: BytesMut::new(),
            switched: false,
        }
    }

    /// Bind `bind_addr`, accept exactly one peer.
    pub fn server(bind_addr: SocketAddr, config: TransportConfig) -> Result<Self> {
        Listener::bind(bind_addr)?.accept(config)
    }

    /// Connect to `remote_addr`, retrying refusals per `policy`.
    pub fn client(
        remote_addr: SocketAddr,
        config: TransportConfig,
        policy: &RetryPolicy,
    ) -> Result<Self> {
        tcp::connect_with_retry(remote_addr, config, policy)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> TransportMode {
        match self.mode {
            Mode::Tcp { .. } => TransportMode::Tcp,
            Mode::Udp(_) => TransportMode::Udp,
            Mode::Closed => TransportMode::Closed,
        }
    }

    /// Local address of the role: the listening address for the server.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Configured remote (client) or accepted peer (server) address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Address writes currently go to.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.mode {
            Mode::Tcp { stream, .. } => stream.peer_addr().ok(),
            Mode::Udp(udp) => udp.peer_addr(),
            Mode::Closed => None,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send `bytes`: a reliable stream write (TCP) or one datagram (UDP).
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.mode {
            Mode::Tcp { stream, .. } => tcp::write_all(stream, bytes, self.config.write_timeout),
            Mode::Udp(udp) => udp.send(bytes),
            Mode::Closed => Err(TransportError::Closed),
        }
    }

    /// Read one message of exactly `expected_len` bytes.
    ///
    /// TCP accumulates across partial reads; bytes received before a read
    /// timeout are kept for the next call. UDP returns one datagram.
    pub fn read(&mut self, expected_len: usize) -> Result<Bytes> {
        match &mut self.mode {
            Mode::Tcp { stream, .. } => {
                tcp::read_exact_pending(stream, &mut self.pending, expected_len)
            }
            Mode::Udp(udp) => udp.recv(expected_len),
            Mode::Closed => Err(TransportError::Closed),
        }
    }

    /// Change the read timeout of the active socket.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &self.mode {
            Mode::Tcp { stream, .. } => stream.set_read_timeout(timeout)?,
            Mode::Udp(udp) => udp.set_read_timeout(timeout)?,
            Mode::Closed => return Err(TransportError::Closed),
        }
        self.config.read_timeout = timeout;
        Ok(())
    }

    /// Close TCP (listening and connected sockets) and continue over UDP.
    ///
    /// A second call fails with [`TransportError::AlreadySwitched`] and
    /// leaves the UDP socket untouched.
    pub fn switch_to_udp(&mut self) -> Result<()> {
        if self.switched {
            return Err(TransportError::AlreadySwitched);
        }

        match std::mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Tcp { listener, stream } => {
                let _ = stream.shutdown(Shutdown::Both);
                drop(stream);
                if listener.is_some() {
                    debug!(local_addr = %self.local_addr, "closed tcp listener");
                }
                drop(listener);
            }
            other => {
                self.mode = other;
                return Err(TransportError::Closed);
            }
        }
        self.switched = true;
        self.pending.clear();

        let udp = match self.role {
            Role::Server => UdpChannel::bind_server(self.local_addr, self.config.read_timeout)?,
            Role::Client => UdpChannel::bind_client(self.remote_addr, self.config.read_timeout)?,
        };
        if self.role == Role::Client {
            self.local_addr = udp.local_addr()?;
        }
        self.mode = Mode::Udp(udp);
        info!(role = %self.role, local_addr = %self.local_addr, "switched transport to udp");
        Ok(())
    }

    /// Whether [`Transport::switch_to_udp`] has been called.
    pub fn has_switched(&self) -> bool {
        self.switched
    }

    /// Second handle on the same socket, for a dedicated reader.
    ///
    /// The clone never owns the TCP listener.
    pub fn try_clone(&self) -> Result<Self> {
        let mode = match &self.mode {
            Mode::Tcp { stream, .. } => Mode::Tcp {
                listener: None,
                stream: stream.try_clone()?,
            },
            Mode::Udp(udp) => Mode::Udp(udp.try_clone()?),
            Mode::Closed => return Err(TransportError::Closed),
        };
        Ok(Self {
            role: self.role,
            mode,
            local_addr: self.local_addr,
            remote_addr: self.remote_addr,
            config: self.config.clone(),
            pending: BytesMut::new(),
            switched: self.switched,
        })
    }

    /// Shut the TCP stream down in both directions, waking readers on every
    /// handle. UDP sockets are left to their read timeout.
    pub fn shutdown(&self) {
        if let Mode::Tcp { stream, .. } = &self.mode {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Close this handle's sockets. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        match std::mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Closed => false,
            Mode::Tcp { stream, listener } => {
                let _ = stream.shutdown(Shutdown::Both);
                drop(listener);
                debug!(role = %self.role, "closed tcp transport");
                true
            }
            Mode::Udp(_) => {
                debug!(role = %self.role, "closed udp transport");
                true
            }
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("role", &self.role)
            .field("mode", &self.mode())
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}
