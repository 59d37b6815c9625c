use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, BytesMut};
use riglink_transport::{Role, Transport, TransportError};
use tracing::{debug, info, warn};

use riglink_frame::SlotFormat;

use crate::error::HandshakeError;
use crate::identity::{Identity, IdentityRegistry};

type Result<T> = std::result::Result<T, HandshakeError>;

/// Fields in the base handshake message.
pub const BASE_FIELDS: usize = 3;

/// Extra `i32` arguments carried when the extension is enabled.
pub const EXTENSION_ARGS: usize = 3;

const FIELD_SIZE: usize = 4;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for handshake negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Deadline for the whole exchange.
    pub timeout: Duration,
    /// Id to display-name mapping used for logging and the unknown-id check.
    pub registry: IdentityRegistry,
    /// Accept ids missing from the registry (logged as undefined).
    pub allow_unknown: bool,
    /// Three extra arguments sent after the base message. Whether the
    /// peer's side carries them is decided by its registry profile; peers
    /// without a profile follow this setting.
    pub extension: Option<[i32; EXTENSION_ARGS]>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            registry: IdentityRegistry::default(),
            allow_unknown: true,
            extension: None,
        }
    }
}

impl HandshakeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_registry(mut self, registry: IdentityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_allow_unknown(mut self, allow_unknown: bool) -> Self {
        self.allow_unknown = allow_unknown;
        self
    }

    /// Enable the extension with up to three arguments; unused ones are zero.
    pub fn with_extension_args(mut self, args: &[i32]) -> Result<Self> {
        if args.len() > EXTENSION_ARGS {
            return Err(HandshakeError::InvalidConfig(format!(
                "at most {EXTENSION_ARGS} extension arguments, got {}",
                args.len()
            )));
        }
        let mut padded = [0i32; EXTENSION_ARGS];
        padded[..args.len()].copy_from_slice(args);
        self.extension = Some(padded);
        Ok(self)
    }

    /// Extension arguments exchanged with peer `id`, or `None` when that
    /// peer speaks the base handshake only.
    pub fn extension_for(&self, id: i32) -> Option<[i32; EXTENSION_ARGS]> {
        match self.registry.profile(id).extension {
            Some(false) => None,
            Some(true) => Some(self.extension.unwrap_or_default()),
            None => self.extension,
        }
    }
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedPeer {
    /// The peer's announced identity.
    pub identity: Identity,
    /// Registry name, or `undefined`.
    pub name: String,
    /// Extension arguments the peer sent, if the extension is enabled.
    pub extra_args: Option<[i32; EXTENSION_ARGS]>,
    /// Slot format pinned by the peer's registry profile.
    pub format: Option<SlotFormat>,
}

impl NegotiatedPeer {
    /// Values per frame received from this peer.
    pub fn recv_slots(&self) -> usize {
        self.identity.outputs as usize
    }

    /// Values per frame sent to this peer.
    pub fn send_slots(&self) -> usize {
        self.identity.inputs as usize
    }
}

/// Run the handshake for the transport's role.
pub fn negotiate(
    transport: &mut Transport,
    local: &Identity,
    config: &HandshakeConfig,
) -> Result<NegotiatedPeer> {
    match transport.role() {
        Role::Server => handshake_server(transport, local, config),
        Role::Client => handshake_client(transport, local, config),
    }
}

/// Server side: receive `[id, outputs, inputs]`, validate, reply
/// `[id, inputs, outputs]`.
///
/// On rejection the connection is closed without a reply.
pub fn handshake_server(
    transport: &mut Transport,
    local: &Identity,
    config: &HandshakeConfig,
) -> Result<NegotiatedPeer> {
    let deadline = Instant::now() + config.timeout;
    let received = with_poll_timeout(transport, config.timeout, |transport| {
        let fields = recv_fields::<BASE_FIELDS>(transport, config.timeout, deadline)?;
        let peer = Identity {
            id: fields[0],
            outputs: count(fields[1], "outputs")?,
            inputs: count(fields[2], "inputs")?,
        };
        check_peer(local, &peer, config)?;
        // The extension only follows for peers whose profile carries it.
        let extra_args = match config.extension_for(peer.id) {
            Some(_) => Some(recv_fields::<EXTENSION_ARGS>(
                transport,
                config.timeout,
                deadline,
            )?),
            None => None,
        };
        Ok((peer, extra_args))
    });
    let (peer, extra_args) = match received {
        Ok(received) => received,
        Err(err) => {
            if err.is_rejection() {
                warn!(error = %err, "rejecting handshake");
                transport.close();
            }
            return Err(err);
        }
    };

    let reply = encode_message(
        [local.id, wire_count(local.inputs)?, wire_count(local.outputs)?],
        config.extension_for(peer.id),
    );
    transport.write(&reply)?;

    Ok(accepted(peer, extra_args, config))
}

/// Client side: send `[id, outputs, inputs]`, receive and validate
/// `[id, inputs, outputs]`.
pub fn handshake_client(
    transport: &mut Transport,
    local: &Identity,
    config: &HandshakeConfig,
) -> Result<NegotiatedPeer> {
    let request = encode_message(
        [local.id, wire_count(local.outputs)?, wire_count(local.inputs)?],
        config.extension,
    );
    transport.write(&request)?;

    let deadline = Instant::now() + config.timeout;
    let (peer, extra_args) = with_poll_timeout(transport, config.timeout, |transport| {
        let fields = recv_fields::<BASE_FIELDS>(transport, config.timeout, deadline)?;
        let peer = Identity {
            id: fields[0],
            inputs: count(fields[1], "inputs")?,
            outputs: count(fields[2], "outputs")?,
        };
        let extra_args = match config.extension_for(peer.id) {
            Some(_) => Some(recv_fields::<EXTENSION_ARGS>(
                transport,
                config.timeout,
                deadline,
            )?),
            None => None,
        };
        Ok((peer, extra_args))
    })?;

    check_peer(local, &peer, config)?;
    Ok(accepted(peer, extra_args, config))
}

fn accepted(
    peer: Identity,
    extra_args: Option<[i32; EXTENSION_ARGS]>,
    config: &HandshakeConfig,
) -> NegotiatedPeer {
    let name = config.registry.name_of(peer.id).to_string();
    if config.registry.contains(peer.id) {
        info!(peer = %peer, %name, "handshake complete");
    } else {
        warn!(peer = %peer, "handshake complete with undefined identity");
    }
    if let Some(args) = extra_args {
        debug!(?args, "received extension arguments");
    }
    let format = config.registry.profile(peer.id).format;
    NegotiatedPeer {
        identity: peer,
        name,
        extra_args,
        format,
    }
}

fn check_peer(local: &Identity, peer: &Identity, config: &HandshakeConfig) -> Result<()> {
    if peer.id == local.id {
        return Err(HandshakeError::DuplicateIdentity(peer.id));
    }
    if !config.allow_unknown && !config.registry.contains(peer.id) {
        return Err(HandshakeError::UnknownIdentity(peer.id));
    }
    if !local.mirrors(peer) {
        return Err(HandshakeError::SizeMismatch {
            local_inputs: local.inputs,
            local_outputs: local.outputs,
            peer_inputs: peer.inputs,
            peer_outputs: peer.outputs,
        });
    }
    Ok(())
}

fn encode_message(
    fields: [i32; BASE_FIELDS],
    extension: Option<[i32; EXTENSION_ARGS]>,
) -> BytesMut {
    let mut buf = BytesMut::with_capacity((BASE_FIELDS + EXTENSION_ARGS) * FIELD_SIZE);
    for field in fields.into_iter().chain(extension.into_iter().flatten()) {
        buf.put_i32_le(field);
    }
    buf
}

fn recv_fields<const N: usize>(
    transport: &mut Transport,
    timeout: Duration,
    deadline: Instant,
) -> Result<[i32; N]> {
    let bytes = loop {
        if Instant::now() >= deadline {
            return Err(HandshakeError::Timeout(timeout));
        }
        match transport.read(N * FIELD_SIZE) {
            Ok(bytes) => break bytes,
            Err(TransportError::TimedOut) => continue,
            Err(TransportError::ConnectionReset) => {
                return Err(HandshakeError::Malformed(
                    "connection closed during handshake".to_string(),
                ));
            }
            Err(TransportError::ShortRead { expected, actual }) => {
                return Err(HandshakeError::Malformed(format!(
                    "connection closed after {actual} of {expected} handshake bytes"
                )));
            }
            Err(err) => return Err(HandshakeError::Transport(err)),
        }
    };

    let mut buf = bytes;
    let mut fields = [0i32; N];
    for field in &mut fields {
        *field = buf.get_i32_le();
    }
    Ok(fields)
}

// Reads must return periodically so the deadline is observed.
fn with_poll_timeout<T>(
    transport: &mut Transport,
    timeout: Duration,
    f: impl FnOnce(&mut Transport) -> Result<T>,
) -> Result<T> {
    let previous = transport.config().read_timeout;
    let poll = previous.unwrap_or(POLL_INTERVAL).min(POLL_INTERVAL).min(timeout);
    transport.set_read_timeout(Some(poll.max(Duration::from_millis(1))))?;
    let result = f(transport);
    let restored = transport.set_read_timeout(previous);
    let value = result?;
    restored?;
    Ok(value)
}

fn count(value: i32, field: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| HandshakeError::Malformed(format!("negative {field} count {value}")))
}

fn wire_count(value: u32) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| HandshakeError::InvalidConfig(format!("vector size {value} exceeds i32")))
}

#[cfg(test)]
mod tests {
    use std::thread;

    use riglink_transport::TransportConfig;

    use super::*;
    use crate::identity::PeerProfile;
    use crate::testutil::{read_blocking, tcp_pair};

    const SERVER: Identity = Identity::new(2, 20, 8);
    const CLIENT: Identity = Identity::new(1, 8, 20);
    const RIG: Identity = Identity::new(0, 8, 20);

    #[test]
    fn both_roles_agree() {
        let (mut server, mut client) = tcp_pair();

        let handle = thread::spawn(move || {
            let peer = negotiate(&mut server, &SERVER, &HandshakeConfig::default());
            (peer, server)
        });
        let client_view = negotiate(&mut client, &CLIENT, &HandshakeConfig::default()).unwrap();
        let (server_view, _server) = handle.join().unwrap();
        let server_view = server_view.unwrap();

        assert_eq!(client_view.identity, SERVER);
        assert_eq!(client_view.name, "Motion Platform");
        assert_eq!(client_view.recv_slots(), 8);
        assert_eq!(server_view.identity, CLIENT);
        assert_eq!(server_view.name, "Mevea");
        assert_eq!(server_view.recv_slots(), 20);
        assert_eq!(server_view.format, Some(SlotFormat::F64));
        assert!(client_view.extra_args.is_none());
        assert_eq!(client_view.format, None);
    }

    #[test]
    fn request_and_response_field_order() {
        let (mut server, mut client) = tcp_pair();

        let handle = thread::spawn(move || {
            handshake_server(&mut server, &SERVER, &HandshakeConfig::default()).unwrap();
        });

        let mut request = BytesMut::new();
        for field in [1i32, 20, 8] {
            request.put_i32_le(field);
        }
        client.write(&request).unwrap();
        let reply = read_blocking(&mut client, 12);
        handle.join().unwrap();

        let mut expected = Vec::new();
        for field in [2i32, 20, 8] {
            expected.extend_from_slice(&field.to_le_bytes());
        }
        assert_eq!(reply.as_ref(), expected.as_slice());
    }

    #[test]
    fn size_mismatch_rejected_without_reply() {
        let (mut server, mut client) = tcp_pair();

        let handle = thread::spawn(move || {
            handshake_server(&mut server, &SERVER, &HandshakeConfig::default())
        });
        let wrong = Identity::new(1, 8, 19);
        let client_result = handshake_client(&mut client, &wrong, &HandshakeConfig::default());

        assert!(matches!(
            handle.join().unwrap(),
            Err(HandshakeError::SizeMismatch {
                peer_outputs: 19,
                ..
            })
        ));
        assert!(matches!(client_result, Err(HandshakeError::Malformed(_))));
    }

    #[test]
    fn duplicate_identity_rejected() {
        let (mut server, mut client) = tcp_pair();

        let handle = thread::spawn(move || {
            handshake_server(&mut server, &SERVER, &HandshakeConfig::default())
        });
        let twin = Identity::new(SERVER.id, 8, 20);
        let _ = handshake_client(&mut client, &twin, &HandshakeConfig::default());

        assert!(matches!(
            handle.join().unwrap(),
            Err(HandshakeError::DuplicateIdentity(2))
        ));
    }

    #[test]
    fn unknown_identity_policy() {
        let (mut server, mut client) = tcp_pair();
        let strict = HandshakeConfig::default().with_allow_unknown(false);

        let handle = thread::spawn(move || handshake_server(&mut server, &SERVER, &strict));
        let stranger = Identity::new(77, 8, 20);
        let _ = handshake_client(&mut client, &stranger, &HandshakeConfig::default());
        assert!(matches!(
            handle.join().unwrap(),
            Err(HandshakeError::UnknownIdentity(77))
        ));

        let (mut server, mut client) = tcp_pair();
        let handle = thread::spawn(move || {
            handshake_server(&mut server, &SERVER, &HandshakeConfig::default())
        });
        handshake_client(&mut client, &stranger, &HandshakeConfig::default()).unwrap();
        let peer = handle.join().unwrap().unwrap();
        assert_eq!(peer.name, crate::identity::UNDEFINED_NAME);
    }

    #[test]
    fn extension_arguments_are_exchanged() {
        let (mut server, mut client) = tcp_pair();

        let server_cfg = HandshakeConfig::default()
            .with_extension_args(&[50])
            .unwrap();
        let client_cfg = HandshakeConfig::default()
            .with_extension_args(&[100, 3])
            .unwrap();

        let handle = thread::spawn(move || handshake_server(&mut server, &SERVER, &server_cfg));
        let client_view = handshake_client(&mut client, &RIG, &client_cfg).unwrap();
        let server_view = handle.join().unwrap().unwrap();

        assert_eq!(client_view.extra_args, Some([50, 0, 0]));
        assert_eq!(server_view.extra_args, Some([100, 3, 0]));
    }

    #[test]
    fn extension_follows_peer_profile() {
        let server_cfg = HandshakeConfig::default()
            .with_extension_args(&[7])
            .unwrap();

        // Legacy peer: base message only, no extension in either direction.
        let (mut server, mut client) = tcp_pair();
        let cfg = server_cfg.clone();
        let handle = thread::spawn(move || {
            let peer = handshake_server(&mut server, &SERVER, &cfg);
            (peer, server)
        });
        let mut request = BytesMut::new();
        for field in [CLIENT.id, 20, 8] {
            request.put_i32_le(field);
        }
        client.write(&request).unwrap();
        let reply = read_blocking(&mut client, 12);
        let (legacy_view, _server) = handle.join().unwrap();
        let legacy_view = legacy_view.unwrap();

        assert_eq!(&reply[..4], &SERVER.id.to_le_bytes());
        assert!(matches!(client.read(1), Err(TransportError::TimedOut)));
        assert_eq!(legacy_view.extra_args, None);
        assert_eq!(legacy_view.format, Some(SlotFormat::F64));

        // Rig peer on the same configuration: extension both ways.
        let (mut server, mut client) = tcp_pair();
        let cfg = server_cfg.clone();
        let handle = thread::spawn(move || handshake_server(&mut server, &SERVER, &cfg));
        let rig_cfg = HandshakeConfig::default()
            .with_extension_args(&[100, 3])
            .unwrap();
        let client_view = handshake_client(&mut client, &RIG, &rig_cfg).unwrap();
        let rig_view = handle.join().unwrap().unwrap();

        assert_eq!(client_view.extra_args, Some([7, 0, 0]));
        assert_eq!(rig_view.extra_args, Some([100, 3, 0]));
        assert_eq!(rig_view.format, None);
    }

    #[test]
    fn profile_forces_extension_without_local_args() {
        let mut registry = IdentityRegistry::default();
        registry.set_profile(0, PeerProfile::default().with_extension(true));
        let cfg = HandshakeConfig::default().with_registry(registry);

        assert_eq!(cfg.extension_for(0), Some([0, 0, 0]));
        assert_eq!(cfg.extension_for(1), None);
        assert_eq!(cfg.extension_for(3), None);
    }

    #[test]
    fn too_many_extension_args() {
        assert!(matches!(
            HandshakeConfig::default().with_extension_args(&[1, 2, 3, 4]),
            Err(HandshakeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn silent_peer_times_out() {
        let (mut server, _client) = tcp_pair();
        let cfg = HandshakeConfig::default().with_timeout(Duration::from_millis(150));

        let started = Instant::now();
        let result = handshake_server(&mut server, &SERVER, &cfg);
        assert!(matches!(result, Err(HandshakeError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn restores_read_timeout() {
        let (mut server, mut client) = tcp_pair();
        let handle = thread::spawn(move || {
            handshake_server(&mut server, &SERVER, &HandshakeConfig::default()).unwrap();
            server
        });
        handshake_client(&mut client, &CLIENT, &HandshakeConfig::default()).unwrap();
        let server = handle.join().unwrap();
        assert_eq!(
            server.config().read_timeout,
            TransportConfig::default().read_timeout
        );
    }
}
