//! Socket layer for a riglink.
//!
//! A link always starts over TCP so the identity handshake is reliable:
//! - the server binds, listens and accepts exactly one peer
//! - the client connects, optionally retrying refusals
//!
//! After the handshake either side may call [`Transport::switch_to_udp`],
//! which closes the TCP sockets and continues on a UDP socket bound to the
//! same local address (server) or an ephemeral port (client). The switch is
//! one-way.

pub mod controller;
pub mod error;
pub mod tcp;
pub mod udp;

pub use controller::{Role, Transport, TransportConfig, TransportMode};
pub use error::{Result, TransportError};
pub use tcp::{connect, connect_with_retry, Listener, RetryPolicy};
pub use udp::UdpChannel;
