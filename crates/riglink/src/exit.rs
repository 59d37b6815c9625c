use std::fmt;
use std::io;

use riglink::peer::{HandshakeError, SessionError};
use riglink::record::RecordingError;
use riglink::transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HANDSHAKE_REJECTED: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::TimedOut => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::Refused { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn handshake_error(context: &str, err: HandshakeError) -> CliError {
    match err {
        HandshakeError::Transport(err) => transport_error(context, err),
        HandshakeError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        HandshakeError::InvalidConfig(_) => CliError::usage(format!("{context}: {err}")),
        HandshakeError::Malformed(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(HANDSHAKE_REJECTED, format!("{context}: {other}")),
    }
}

pub fn recording_error(context: &str, err: RecordingError) -> CliError {
    match err {
        RecordingError::Io { source, .. } => io_error(context, source),
        RecordingError::InvalidLayout(_) => CliError::usage(format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Handshake(err) => handshake_error(context, err),
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Recording(err) => recording_error(context, err),
        SessionError::Frame(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn maps_handshake_rejections() {
        let err = session_error(
            "connect failed",
            SessionError::Handshake(HandshakeError::DuplicateIdentity(2)),
        );
        assert_eq!(err.code, HANDSHAKE_REJECTED);
        assert!(err.message.starts_with("connect failed: "));

        let err = handshake_error("handshake", HandshakeError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn maps_socket_errors_through_layers() {
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = session_error("bind", SessionError::Transport(TransportError::Io(io)));
        assert_eq!(err.code, PERMISSION_DENIED);

        let err = transport_error("read", TransportError::ConnectionReset);
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn truncated_recordings_are_invalid_data() {
        let err = recording_error(
            "dump",
            RecordingError::Truncated {
                path: "x.bin".into(),
                trailing: 3,
            },
        );
        assert_eq!(err.code, DATA_INVALID);
    }
}
