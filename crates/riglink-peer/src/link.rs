//! Threaded link runtime.
//!
//! A [`Link`] owns a split session: a dedicated thread receives frames and
//! keeps the latest good vector, the caller's control loop sends through
//! [`Link::send_tick`], and client TCP links get a reconnection supervisor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use riglink_record::Recorder;
use riglink_transport::{Role, TransportError, TransportMode};
use tracing::{debug, info, warn};

use crate::connector::ClientConfig;
use crate::error::{Result, SessionError};
use crate::handshake::NegotiatedPeer;
use crate::session::{Received, Session, SessionState, StateCell, TickReceiver, TickSender};
use crate::supervisor;

/// Runtime options for a [`Link`].
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Reconnect settings. The supervisor only runs for client links on TCP.
    pub reconnect: Option<ClientConfig>,
    /// Supervisor polling interval.
    pub reconnect_interval: Duration,
    /// Receive-thread sleep while the link is not active.
    pub idle_poll: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            reconnect: None,
            reconnect_interval: Duration::from_secs(5),
            idle_poll: Duration::from_millis(50),
        }
    }
}

impl LinkOptions {
    pub fn with_reconnect(mut self, config: ClientConfig) -> Self {
        self.reconnect = Some(config);
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }
}

/// Counters since the link started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub send_errors: u64,
    pub received: u64,
    pub keepalives: u64,
    /// Frames dropped for length, checksum or sequence errors.
    pub discarded: u64,
    pub timeouts: u64,
    pub disconnects: u64,
    pub reconnects: u64,
    pub reconnect_failures: u64,
    /// The recording file's date is behind the local date.
    pub recording_rolled_over: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    sent: AtomicU64,
    send_errors: AtomicU64,
    received: AtomicU64,
    keepalives: AtomicU64,
    discarded: AtomicU64,
    timeouts: AtomicU64,
    disconnects: AtomicU64,
    pub(crate) reconnects: AtomicU64,
    pub(crate) reconnect_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> LinkStats {
        LinkStats {
            sent: self.sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            keepalives: self.keepalives.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            reconnect_failures: self.reconnect_failures.load(Ordering::Relaxed),
            recording_rolled_over: false,
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone)]
struct Latest {
    values: Vec<f64>,
    at: Instant,
}

/// State shared between the caller, the receive thread and the supervisor.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: StateCell,
    pub(crate) sender: Mutex<TickSender>,
    pub(crate) receiver: Mutex<TickReceiver>,
    pub(crate) peer: Mutex<NegotiatedPeer>,
    pub(crate) counters: Counters,
    pub(crate) running: AtomicBool,
    recorder: Option<Arc<Recorder>>,
    latest: Mutex<Option<Latest>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running link.
#[derive(Debug)]
pub struct Link {
    role: Role,
    shared: Arc<Shared>,
    stop_tx: Option<Sender<()>>,
    receive_handle: Option<JoinHandle<()>>,
    supervisor_handle: Option<JoinHandle<()>>,
}

impl Link {
    /// Split `session` and start the background threads.
    pub fn start(mut session: Session, options: LinkOptions) -> Result<Self> {
        let state = session.state();
        if !state.is_active() {
            return Err(SessionError::InvalidState(state));
        }

        let role = session.role();
        let mode = session.mode();
        let cell = StateCell::new(state);
        session.adopt_state(&cell);
        let peer = session.peer().clone();
        let recorder = session.recorder().cloned();
        let (sender, receiver) = session.into_split()?;

        let shared = Arc::new(Shared {
            state: cell,
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            peer: Mutex::new(peer),
            counters: Counters::default(),
            running: AtomicBool::new(true),
            recorder,
            latest: Mutex::new(None),
        });

        let receive_handle = {
            let shared = Arc::clone(&shared);
            let idle = options.idle_poll;
            thread::Builder::new()
                .name("riglink-recv".to_string())
                .spawn(move || receive_loop(&shared, idle))
                .map_err(TransportError::Io)?
        };

        let (stop_tx, stop_rx) = mpsc::channel();
        let supervisor_handle = match options.reconnect {
            Some(config) if role == Role::Client && mode == TransportMode::Tcp => Some(
                supervisor::spawn(Arc::clone(&shared), config, options.reconnect_interval, stop_rx)
                    .map_err(TransportError::Io)?,
            ),
            Some(_) => {
                debug!(%role, ?mode, "reconnection supervisor not started");
                None
            }
            None => None,
        };

        info!(%role, ?mode, supervised = supervisor_handle.is_some(), "link started");
        Ok(Self {
            role,
            shared,
            stop_tx: Some(stop_tx),
            receive_handle: Some(receive_handle),
            supervisor_handle,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    /// The current peer; replaced when the supervisor reconnects.
    pub fn peer(&self) -> NegotiatedPeer {
        lock(&self.shared.peer).clone()
    }

    pub fn stats(&self) -> LinkStats {
        let mut stats = self.shared.counters.snapshot();
        stats.recording_rolled_over = self
            .shared
            .recorder
            .as_ref()
            .is_some_and(|recorder| recorder.date_rolled_over());
        stats
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Send one vector on the current connection.
    pub fn send_tick(&self, values: &[f64]) -> Result<()> {
        let result = lock(&self.shared.sender).send_tick(values);
        match &result {
            Ok(()) => bump(&self.shared.counters.sent),
            Err(_) => bump(&self.shared.counters.send_errors),
        }
        result
    }

    /// Latest vector received. Bad frames never overwrite it.
    pub fn latest(&self) -> Option<Vec<f64>> {
        lock(&self.shared.latest).as_ref().map(|latest| latest.values.clone())
    }

    /// Time since the latest vector arrived.
    pub fn latest_age(&self) -> Option<Duration> {
        lock(&self.shared.latest)
            .as_ref()
            .map(|latest| latest.at.elapsed())
    }

    /// Stop threads, close sockets and drain the recorder. Idempotent.
    pub fn stop(&mut self) {
        if self.receive_handle.is_none() && self.supervisor_handle.is_none() {
            return;
        }
        self.shared.running.store(false, Ordering::Release);
        drop(self.stop_tx.take());
        lock(&self.shared.sender).shutdown();

        if let Some(handle) = self.supervisor_handle.take() {
            if handle.join().is_err() {
                warn!("supervisor thread panicked");
            }
        }
        if let Some(handle) = self.receive_handle.take() {
            if handle.join().is_err() {
                warn!("receive thread panicked");
            }
        }

        lock(&self.shared.sender).close();
        lock(&self.shared.receiver).close();
        self.shared.state.set(SessionState::Closed);

        let stats = self.stats();
        info!(
            role = %self.role,
            sent = stats.sent,
            received = stats.received,
            discarded = stats.discarded,
            reconnects = stats.reconnects,
            "link stopped"
        );
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(shared: &Shared, idle: Duration) {
    while shared.running.load(Ordering::Acquire) {
        let state = shared.state.get();
        if state == SessionState::Closed {
            break;
        }
        if !state.is_active() {
            thread::sleep(idle);
            continue;
        }

        let received = lock(&shared.receiver).receive_tick();
        let counters = &shared.counters;
        match received {
            Received::Data(values) => {
                bump(&counters.received);
                *lock(&shared.latest) = Some(Latest {
                    values,
                    at: Instant::now(),
                });
            }
            Received::Keepalive => bump(&counters.keepalives),
            Received::Failure(SessionError::Transport(TransportError::TimedOut)) => {
                bump(&counters.timeouts);
            }
            Received::Failure(SessionError::Closed | SessionError::InvalidState(_)) => {}
            Received::Failure(err) => {
                if shared.state.get().is_active() {
                    bump(&counters.discarded);
                    debug!(error = %err, "receive failure, keeping previous vector");
                } else {
                    bump(&counters.disconnects);
                }
            }
        }
    }
    debug!("receive thread exiting");
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::connector::connect;
    use crate::identity::Identity;
    use crate::listener::RigListener;
    use crate::testutil::loopback;

    const SERVER: Identity = Identity::new(2, 3, 2);
    const CLIENT: Identity = Identity::new(0, 2, 3);

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn linked() -> (Link, Link) {
        let listener = RigListener::bind(loopback(), SERVER).unwrap();
        let addr = listener.local_addr();
        let server = thread::spawn(move || listener.accept().unwrap());
        let client = connect(&ClientConfig::new(addr, CLIENT)).unwrap();
        let server = server.join().unwrap();
        (
            Link::start(server, LinkOptions::default()).unwrap(),
            Link::start(client, LinkOptions::default()).unwrap(),
        )
    }

    #[test]
    fn exchanges_vectors_both_ways() {
        let (server, client) = linked();

        client.send_tick(&[0.5, 0.5, 0.5]).unwrap();
        server.send_tick(&[-0.5, 1.0]).unwrap();

        assert!(wait_until(|| server.latest().is_some()));
        assert!(wait_until(|| client.latest().is_some()));
        assert_eq!(server.latest().unwrap().len(), 3);
        assert_eq!(client.latest().unwrap()[1], 1.0);
        assert_eq!(client.stats().sent, 1);
        assert!(!client.stats().recording_rolled_over);
        assert!(server.stats().received >= 1);
    }

    #[test]
    fn stop_is_idempotent_and_closes() {
        let (mut server, mut client) = linked();
        client.stop();
        client.stop();
        assert_eq!(client.state(), SessionState::Closed);
        assert!(matches!(
            client.send_tick(&[0.0, 0.0, 0.0]),
            Err(SessionError::Closed)
        ));

        assert!(wait_until(|| server.state() == SessionState::Closed));
        server.stop();
    }

    #[test]
    fn rejects_inactive_session() {
        let listener = RigListener::bind(loopback(), SERVER).unwrap();
        let addr = listener.local_addr();
        let server = thread::spawn(move || listener.accept().unwrap());
        let mut client = connect(&ClientConfig::new(addr, CLIENT)).unwrap();
        let _server = server.join().unwrap();

        client.close();
        assert!(matches!(
            Link::start(client, LinkOptions::default()),
            Err(SessionError::InvalidState(SessionState::Closed))
        ));
    }
}
