//! Identity handshake, link sessions and reconnection.
//!
//! A link is established in three steps:
//! 1. TCP connect ([`RigListener`] on the server, [`connect`] on the client)
//! 2. identity handshake ([`negotiate`]) fixing both vector sizes
//! 3. a [`Session`] exchanging fixed-length frames, optionally moved to UDP
//!
//! [`Link`] runs a session on background threads and, for client TCP links,
//! re-establishes it after a connection loss.

pub mod connector;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod link;
pub mod listener;
pub mod schedule;
pub mod session;
mod supervisor;

#[cfg(test)]
mod testutil;

pub use connector::{connect, ClientConfig};
pub use error::{HandshakeError, Result, SessionError};
pub use handshake::{
    handshake_client, handshake_server, negotiate, HandshakeConfig, NegotiatedPeer,
    BASE_FIELDS, EXTENSION_ARGS,
};
pub use identity::{Identity, IdentityRegistry, PeerProfile, UNDEFINED_NAME};
pub use link::{Link, LinkOptions, LinkStats};
pub use listener::RigListener;
pub use schedule::Ticker;
pub use session::{Received, Session, SessionConfig, SessionState, TickReceiver, TickSender};
