use std::net::SocketAddr;
use std::sync::Arc;

use riglink_record::Recorder;
use riglink_transport::{RetryPolicy, Transport, TransportConfig};
use tracing::debug;

use crate::error::Result;
use crate::handshake::{handshake_client, HandshakeConfig};
use crate::identity::Identity;
use crate::session::{Session, SessionConfig};

/// Everything a client needs to (re)establish its link.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub remote: SocketAddr,
    pub local: Identity,
    pub transport: TransportConfig,
    /// Retry policy for the initial connection.
    pub retry: RetryPolicy,
    pub handshake: HandshakeConfig,
    pub session: SessionConfig,
}

impl ClientConfig {
    pub fn new(remote: SocketAddr, local: Identity) -> Self {
        Self {
            remote,
            local,
            transport: TransportConfig::default(),
            retry: RetryPolicy::once(),
            handshake: HandshakeConfig::default(),
            session: SessionConfig::default(),
        }
    }

    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport = config;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_handshake_config(mut self, config: HandshakeConfig) -> Self {
        self.handshake = config;
        self
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }
}

/// Connect to a listening rig as a client and open the session.
pub fn connect(config: &ClientConfig) -> Result<Session> {
    let mut transport = Transport::client(config.remote, config.transport.clone(), &config.retry)?;
    let peer = handshake_client(&mut transport, &config.local, &config.handshake)?;
    Session::new(transport, config.local, peer, &config.session)
}

/// Single connection attempt that keeps recording into `recorder`.
pub(crate) fn reconnect(
    config: &ClientConfig,
    recorder: Option<Arc<Recorder>>,
) -> Result<Session> {
    debug!(remote = %config.remote, "reconnecting");
    let mut transport =
        Transport::client(config.remote, config.transport.clone(), &RetryPolicy::once())?;
    let peer = handshake_client(&mut transport, &config.local, &config.handshake)?;
    Session::with_recorder(transport, config.local, peer, &config.session, recorder)
}
