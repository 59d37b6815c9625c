use std::net::SocketAddr;

use riglink_transport::{Listener, TransportConfig};

use crate::error::Result;
use crate::handshake::{handshake_server, HandshakeConfig};
use crate::identity::Identity;
use crate::session::{Session, SessionConfig};

/// Accepts the single peer of a server-role link.
pub struct RigListener {
    listener: Listener,
    local: Identity,
    transport_config: TransportConfig,
    handshake_config: HandshakeConfig,
    session_config: SessionConfig,
}

impl RigListener {
    /// Bind a TCP listener for `local`.
    pub fn bind(addr: SocketAddr, local: Identity) -> Result<Self> {
        Ok(Self {
            listener: Listener::bind(addr)?,
            local,
            transport_config: TransportConfig::default(),
            handshake_config: HandshakeConfig::default(),
            session_config: SessionConfig::default(),
        })
    }

    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    pub fn with_handshake_config(mut self, config: HandshakeConfig) -> Self {
        self.handshake_config = config;
        self
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// The actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept one peer, run the handshake and open the session.
    ///
    /// A failed handshake consumes the listener; bind again to retry.
    pub fn accept(self) -> Result<Session> {
        let mut transport = self.listener.accept(self.transport_config)?;
        let peer = handshake_server(&mut transport, &self.local, &self.handshake_config)?;
        Session::new(transport, self.local, peer, &self.session_config)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::connector::{connect, ClientConfig};
    use crate::session::SessionState;
    use crate::testutil::loopback;

    #[test]
    fn accept_and_connect_sessions() {
        let server_id = Identity::new(2, 4, 6);
        let client_id = Identity::new(0, 6, 4);

        let listener = RigListener::bind(loopback(), server_id).unwrap();
        let addr = listener.local_addr();
        let server = thread::spawn(move || listener.accept().unwrap());

        let client = connect(&ClientConfig::new(addr, client_id)).unwrap();
        let server = server.join().unwrap();

        assert_eq!(client.peer().name, "Motion Platform");
        assert_eq!(server.peer().name, "Excavator");
        assert_eq!(client.send_layout().slots, 4);
        assert_eq!(server.send_layout().slots, 6);
        assert_eq!(server.state(), SessionState::TcpActive);
    }

    #[test]
    fn handshake_failure_is_reported() {
        let server_id = Identity::new(2, 4, 6);
        let listener = RigListener::bind(loopback(), server_id).unwrap();
        let addr = listener.local_addr();
        let server = thread::spawn(move || listener.accept());

        let mismatched = Identity::new(0, 5, 4);
        assert!(connect(&ClientConfig::new(addr, mismatched)).is_err());
        assert!(matches!(
            server.join().unwrap(),
            Err(crate::error::SessionError::Handshake(_))
        ));
    }
}
