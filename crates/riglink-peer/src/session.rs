use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use riglink_frame::{
    verify_keepalive, ChecksumKind, FrameLayout, SequenceTracker, SlotFormat, KEEPALIVE,
    KEEPALIVE_LEN,
};
use riglink_record::{Recorder, RecorderConfig};
use riglink_transport::{Role, Transport, TransportError, TransportMode};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::handshake::NegotiatedPeer;
use crate::identity::Identity;

/// Lifecycle of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Handshaking,
    TcpActive,
    UdpActive,
    /// Client lost its connection; the supervisor may reconnect.
    Degraded,
    Closed,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Handshaking => "handshaking",
            SessionState::TcpActive => "tcp-active",
            SessionState::UdpActive => "udp-active",
            SessionState::Degraded => "degraded",
            SessionState::Closed => "closed",
        }
    }

    /// Whether ticks can flow.
    pub const fn is_active(self) -> bool {
        matches!(self, SessionState::TcpActive | SessionState::UdpActive)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared by a session's halves and the supervisor.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCell(Arc<Mutex<SessionState>>);

impl StateCell {
    pub(crate) fn new(state: SessionState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, state: SessionState) {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            debug!(from = %*current, to = %state, "session state change");
            *current = state;
        }
    }

    /// Replace `from` with `to` only if the state is still `from`.
    pub(crate) fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != from {
            return false;
        }
        debug!(%from, %to, "session state change");
        *current = to;
        true
    }

    fn ensure_active(&self) -> Result<SessionState> {
        match self.get() {
            state if state.is_active() => Ok(state),
            SessionState::Closed => Err(SessionError::Closed),
            state => Err(SessionError::InvalidState(state)),
        }
    }

    // Client connections degrade and wait for the supervisor; a server
    // session is over.
    fn connection_lost(&self, role: Role, err: &TransportError) {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !current.is_active() {
            return;
        }
        let next = match role {
            Role::Client => SessionState::Degraded,
            Role::Server => SessionState::Closed,
        };
        warn!(%role, error = %err, from = %*current, to = %next, "connection lost");
        *current = next;
    }
}

fn is_connection_loss(err: &TransportError, mode: TransportMode) -> bool {
    match err {
        TransportError::TimedOut
        | TransportError::NoPeerAddress
        | TransportError::AlreadySwitched => false,
        // A stray datagram of the wrong size is just a bad frame.
        TransportError::ShortRead { .. } => mode == TransportMode::Tcp,
        _ => true,
    }
}

/// Frame settings for a session. Slot counts come from the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub format: SlotFormat,
    /// Quantization scale; `None` uses the format default.
    pub scale: Option<f64>,
    /// Prefix frames with a sequence number and drop stale ones.
    pub sequenced: bool,
    pub checksum: ChecksumKind,
    /// Record every sent frame.
    pub recorder: Option<RecorderConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: SlotFormat::default(),
            scale: None,
            sequenced: false,
            checksum: ChecksumKind::default(),
            recorder: None,
        }
    }
}

impl SessionConfig {
    pub fn with_format(mut self, format: SlotFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_sequence(mut self, sequenced: bool) -> Self {
        self.sequenced = sequenced;
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_recorder(mut self, recorder: RecorderConfig) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Layout for frames of `slots` values.
    pub fn layout(&self, slots: usize) -> FrameLayout {
        self.layout_for(slots, None)
    }

    /// Layout for a peer whose profile may pin the slot format. A pinned
    /// format other than the configured one uses its own default scale.
    pub fn layout_for(&self, slots: usize, pinned: Option<SlotFormat>) -> FrameLayout {
        let format = pinned.unwrap_or(self.format);
        let layout = FrameLayout::new(slots, format)
            .with_sequence(self.sequenced)
            .with_checksum(self.checksum);
        match self.scale {
            Some(scale) if format == self.format => layout.with_scale(scale),
            _ => layout,
        }
    }
}

/// Result of one receive tick.
#[derive(Debug)]
pub enum Received {
    Data(Vec<f64>),
    /// The peer declared zero outputs and sent its one-byte keepalive.
    Keepalive,
    Failure(SessionError),
}

impl Received {
    pub fn is_data(&self) -> bool {
        matches!(self, Received::Data(_))
    }
}

#[derive(Debug)]
struct Outbound {
    layout: FrameLayout,
    sequence: u32,
    buf: BytesMut,
    recorder: Option<Arc<Recorder>>,
}

impl Outbound {
    fn send(&mut self, transport: &mut Transport, values: &[f64]) -> Result<()> {
        if self.layout.slots == 0 {
            transport.write(&[KEEPALIVE])?;
            return Ok(());
        }

        self.buf.clear();
        let sequence = self.layout.sequenced.then_some(self.sequence);
        self.layout.encode(values, sequence, &mut self.buf)?;
        transport.write(&self.buf)?;
        self.sequence = self.sequence.wrapping_add(1);

        if let Some(recorder) = &self.recorder {
            if let Err(err) = recorder.append(&self.buf) {
                warn!(error = %err, "failed to record frame");
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Inbound {
    layout: FrameLayout,
    tracker: SequenceTracker,
}

impl Inbound {
    fn expected_len(&self) -> usize {
        if self.layout.slots == 0 {
            KEEPALIVE_LEN
        } else {
            self.layout.wire_len()
        }
    }

    fn receive(&mut self, transport: &mut Transport) -> Received {
        let bytes = match transport.read(self.expected_len()) {
            Ok(bytes) => bytes,
            Err(err) => return Received::Failure(err.into()),
        };
        if self.layout.slots == 0 {
            return match verify_keepalive(&bytes) {
                Ok(()) => Received::Keepalive,
                Err(err) => {
                    warn!(error = %err, "discarding keepalive");
                    Received::Failure(err.into())
                }
            };
        }

        let frame = match self.layout.decode(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "discarding frame");
                return Received::Failure(err.into());
            }
        };
        if let Some(sequence) = frame.sequence {
            if let Err(err) = self.tracker.accept(sequence) {
                warn!(error = %err, "discarding frame");
                return Received::Failure(err.into());
            }
        }
        Received::Data(frame.values)
    }
}

/// One negotiated link: transport, frame layouts and state.
#[derive(Debug)]
pub struct Session {
    local: Identity,
    peer: NegotiatedPeer,
    transport: Transport,
    outbound: Outbound,
    inbound: Inbound,
    state: StateCell,
    closed: bool,
}

impl Session {
    /// Build a session over a transport that has completed the handshake.
    ///
    /// Opens a recorder for sent frames when `config.recorder` is set.
    pub fn new(
        transport: Transport,
        local: Identity,
        peer: NegotiatedPeer,
        config: &SessionConfig,
    ) -> Result<Self> {
        let send_layout = config.layout_for(local.outputs as usize, peer.format);
        let recorder = match &config.recorder {
            Some(recorder_config) if send_layout.slots > 0 => Some(Arc::new(Recorder::create(
                recorder_config.clone(),
                send_layout,
            )?)),
            Some(_) => {
                info!("nothing to record, local side sends no values");
                None
            }
            None => None,
        };
        Self::with_recorder(transport, local, peer, config, recorder)
    }

    /// Like [`Session::new`], reusing an open recorder.
    pub fn with_recorder(
        transport: Transport,
        local: Identity,
        peer: NegotiatedPeer,
        config: &SessionConfig,
        recorder: Option<Arc<Recorder>>,
    ) -> Result<Self> {
        let send_layout = config.layout_for(local.outputs as usize, peer.format);
        let recv_layout = config.layout_for(peer.recv_slots(), peer.format);
        send_layout.validate()?;
        recv_layout.validate()?;

        info!(
            role = %transport.role(),
            peer = %peer.name,
            send_bytes = send_layout.wire_len(),
            recv_bytes = recv_layout.wire_len(),
            format = %send_layout.format,
            "session established"
        );

        Ok(Self {
            local,
            peer,
            transport,
            outbound: Outbound {
                layout: send_layout,
                sequence: 0,
                buf: BytesMut::with_capacity(send_layout.wire_len()),
                recorder,
            },
            inbound: Inbound {
                layout: recv_layout,
                tracker: SequenceTracker::new(),
            },
            state: StateCell::new(SessionState::TcpActive),
            closed: false,
        })
    }

    pub fn role(&self) -> Role {
        self.transport.role()
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    pub fn peer(&self) -> &NegotiatedPeer {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn send_layout(&self) -> &FrameLayout {
        &self.outbound.layout
    }

    pub fn recv_layout(&self) -> &FrameLayout {
        &self.inbound.layout
    }

    pub fn recorder(&self) -> Option<&Arc<Recorder>> {
        self.outbound.recorder.as_ref()
    }

    /// Encode and send one vector (or the keepalive byte).
    pub fn send_tick(&mut self, values: &[f64]) -> Result<()> {
        self.state.ensure_active()?;
        let result = self.outbound.send(&mut self.transport, values);
        observe(&self.state, &self.transport, result)
    }

    /// Wait up to the read timeout for one frame from the peer.
    pub fn receive_tick(&mut self) -> Received {
        if let Err(err) = self.state.ensure_active() {
            return Received::Failure(err);
        }
        let received = self.inbound.receive(&mut self.transport);
        observe_received(&self.state, &self.transport, received)
    }

    /// Move steady-state traffic to UDP. Only valid while on TCP.
    pub fn switch_to_udp(&mut self) -> Result<()> {
        match self.state.get() {
            SessionState::TcpActive => {}
            SessionState::Closed => return Err(SessionError::Closed),
            state => return Err(SessionError::InvalidState(state)),
        }
        self.transport.switch_to_udp()?;
        self.state.set(SessionState::UdpActive);
        Ok(())
    }

    /// Split into independently owned send and receive halves.
    pub fn into_split(self) -> Result<(TickSender, TickReceiver)> {
        let reader = self.transport.try_clone()?;
        let receiver = TickReceiver {
            transport: reader,
            inbound: self.inbound,
            state: self.state.clone(),
        };
        let sender = TickSender {
            peer: self.peer,
            transport: self.transport,
            outbound: self.outbound,
            state: self.state,
            closed: self.closed,
        };
        Ok((sender, receiver))
    }

    /// Close sockets and drain the recorder. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.close();
        drain(self.outbound.recorder.as_deref());
        self.state.set(SessionState::Closed);
    }

    /// Share `cell` with the link that installs this session. The cell's
    /// state is left for the installer to update.
    pub(crate) fn adopt_state(&mut self, cell: &StateCell) {
        self.state = cell.clone();
    }
}

fn observe(state: &StateCell, transport: &Transport, result: Result<()>) -> Result<()> {
    if let Err(SessionError::Transport(err)) = &result {
        if is_connection_loss(err, transport.mode()) {
            state.connection_lost(transport.role(), err);
        }
    }
    result
}

fn observe_received(state: &StateCell, transport: &Transport, received: Received) -> Received {
    if let Received::Failure(SessionError::Transport(err)) = &received {
        if is_connection_loss(err, transport.mode()) {
            state.connection_lost(transport.role(), err);
        }
    }
    received
}

fn drain(recorder: Option<&Recorder>) {
    if let Some(recorder) = recorder {
        if let Err(err) = recorder.flush_remaining() {
            warn!(error = %err, "failed to drain recording");
        }
    }
}

/// Send half of a split session.
#[derive(Debug)]
pub struct TickSender {
    peer: NegotiatedPeer,
    transport: Transport,
    outbound: Outbound,
    state: StateCell,
    closed: bool,
}

impl TickSender {
    pub fn send_tick(&mut self, values: &[f64]) -> Result<()> {
        self.state.ensure_active()?;
        let result = self.outbound.send(&mut self.transport, values);
        observe(&self.state, &self.transport, result)
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn peer(&self) -> &NegotiatedPeer {
        &self.peer
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.outbound.layout
    }

    pub fn recorder(&self) -> Option<&Arc<Recorder>> {
        self.outbound.recorder.as_ref()
    }

    /// Wake a receive half blocked on the same TCP connection.
    pub fn shutdown(&self) {
        self.transport.shutdown();
    }

    /// Close the socket and drain the recorder. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.close();
        drain(self.outbound.recorder.as_deref());
    }

    /// Close without touching the recorder, for a connection being replaced.
    pub(crate) fn retire(&mut self) {
        self.closed = true;
        self.transport.close();
    }
}

/// Receive half of a split session.
#[derive(Debug)]
pub struct TickReceiver {
    transport: Transport,
    inbound: Inbound,
    state: StateCell,
}

impl TickReceiver {
    pub fn receive_tick(&mut self) -> Received {
        if let Err(err) = self.state.ensure_active() {
            return Received::Failure(err);
        }
        let received = self.inbound.receive(&mut self.transport);
        observe_received(&self.state, &self.transport, received)
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.inbound.layout
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}
