use std::time::Duration;

use riglink_frame::FrameError;
use riglink_record::RecordingError;
use riglink_transport::TransportError;

use crate::session::SessionState;

/// Errors that end a handshake attempt.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The peer's vector sizes do not mirror ours.
    #[error(
        "size mismatch: local {local_inputs} in / {local_outputs} out, \
         peer {peer_inputs} in / {peer_outputs} out"
    )]
    SizeMismatch {
        local_inputs: u32,
        local_outputs: u32,
        peer_inputs: u32,
        peer_outputs: u32,
    },

    /// The peer claims our own identity id.
    #[error("peer uses our own identity id {0}")]
    DuplicateIdentity(i32),

    /// The peer's id is not in the registry and unknown ids are refused.
    #[error("unknown peer identity id {0}")]
    UnknownIdentity(i32),

    /// No complete handshake message arrived in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The peer sent something that is not a handshake, or hung up mid-way.
    #[error("malformed handshake: {0}")]
    Malformed(String),

    /// Local handshake configuration is unusable.
    #[error("invalid handshake configuration: {0}")]
    InvalidConfig(String),

    /// Socket failure during the handshake.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl HandshakeError {
    /// True when the peer was refused after a well-formed message.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            HandshakeError::SizeMismatch { .. }
                | HandshakeError::DuplicateIdentity(_)
                | HandshakeError::UnknownIdentity(_)
        )
    }
}

/// Errors reported by a link session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// A received frame was discarded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("recording error: {0}")]
    Recording(#[from] RecordingError),

    /// The operation is not valid in the current state.
    #[error("operation not valid while {0}")]
    InvalidState(SessionState),

    /// The session has been closed.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// True when the error only affects a single frame and the link is
    /// still usable.
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::Frame(_) => true,
            SessionError::Transport(err) => {
                matches!(err, TransportError::TimedOut | TransportError::NoPeerAddress)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
