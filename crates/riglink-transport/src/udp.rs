use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Connectionless channel used after the TCP handshake.
///
/// The server binds its former TCP address and learns where to send from
/// every datagram it receives. The client binds an ephemeral port and always
/// sends to the configured remote address.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
    send_to: Arc<Mutex<Option<SocketAddr>>>,
    learn_peer: bool,
    recv_buf: Vec<u8>,
}

impl UdpChannel {
    /// Bind as the server side.
    pub fn bind_server(addr: SocketAddr, read_timeout: Option<Duration>) -> Result<Self> {
        let socket =
            UdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        socket.set_read_timeout(read_timeout)?;
        info!(local_addr = %socket.local_addr()?, "udp server bound");
        Ok(Self {
            socket,
            send_to: Arc::new(Mutex::new(None)),
            learn_peer: true,
            recv_buf: Vec::new(),
        })
    }

    /// Bind an ephemeral port as the client side, sending to `remote`.
    pub fn bind_client(remote: SocketAddr, read_timeout: Option<Duration>) -> Result<Self> {
        let any: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket =
            UdpSocket::bind(any).map_err(|source| TransportError::Bind { addr: any, source })?;
        socket.set_read_timeout(read_timeout)?;
        info!(local_addr = %socket.local_addr()?, %remote, "udp client ready");
        Ok(Self {
            socket,
            send_to: Arc::new(Mutex::new(Some(remote))),
            learn_peer: false,
            recv_buf: Vec::new(),
        })
    }

    /// Send one datagram to the current peer address.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let target = self.peer_addr().ok_or(TransportError::NoPeerAddress)?;
        loop {
            match self.socket.send_to(bytes, target) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::from_io(err)),
            }
        }
    }

    /// Receive one datagram that must be exactly `expected` bytes long.
    pub fn recv(&mut self, expected: usize) -> Result<Bytes> {
        // One spare byte so an oversized datagram shows up as too long
        // instead of silently truncated.
        self.recv_buf.resize(expected + 1, 0);
        let (n, source) = loop {
            match self.socket.recv_from(&mut self.recv_buf) {
                Ok(received) => break received,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::from_io(err)),
            }
        };

        if self.learn_peer {
            let mut send_to = self.send_to.lock().unwrap_or_else(PoisonError::into_inner);
            if *send_to != Some(source) {
                debug!(peer = %source, "learned udp peer address");
                *send_to = Some(source);
            }
        }

        if n != expected {
            return Err(TransportError::ShortRead {
                expected,
                actual: n,
            });
        }
        Ok(Bytes::copy_from_slice(&self.recv_buf[..n]))
    }

    /// Current send target.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.send_to.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }

    /// Second handle on the same socket. The learned peer address is shared.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            send_to: Arc::clone(&self.send_to),
            learn_peer: self.learn_peer,
            recv_buf: Vec::new(),
        })
    }
}
