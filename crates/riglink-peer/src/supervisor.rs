//! Reconnection supervisor for client TCP links.
//!
//! Polls the shared state at a fixed interval. A degraded link gets one
//! connection attempt and a fresh handshake per poll; the previous transport
//! mode is not restored.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connector::{self, ClientConfig};
use crate::error::Result;
use crate::link::{bump, lock, Shared};
use crate::session::SessionState;

pub(crate) fn spawn(
    shared: Arc<Shared>,
    config: ClientConfig,
    interval: Duration,
    stop_rx: Receiver<()>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("riglink-supervisor".to_string())
        .spawn(move || run(&shared, &config, interval, &stop_rx))
}

fn run(shared: &Shared, config: &ClientConfig, interval: Duration, stop_rx: &Receiver<()>) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        if !shared
            .state
            .transition(SessionState::Degraded, SessionState::Handshaking)
        {
            continue;
        }

        match reestablish(shared, config) {
            Ok(()) => {
                bump(&shared.counters.reconnects);
                info!(remote = %config.remote, "link re-established");
            }
            Err(err) => {
                bump(&shared.counters.reconnect_failures);
                shared
                    .state
                    .transition(SessionState::Handshaking, SessionState::Degraded);
                warn!(
                    remote = %config.remote,
                    error = %err,
                    retry_in = ?interval,
                    "reconnect failed"
                );
            }
        }
    }
    debug!("supervisor exiting");
}

fn reestablish(shared: &Shared, config: &ClientConfig) -> Result<()> {
    let recorder = lock(&shared.sender).recorder().cloned();
    let mut session = connector::reconnect(config, recorder)?;
    session.adopt_state(&shared.state);
    let peer = session.peer().clone();
    let (sender, receiver) = session.into_split()?;

    if !shared.running.load(Ordering::Acquire) {
        let mut sender = sender;
        sender.retire();
        return Ok(());
    }

    {
        let mut current = lock(&shared.sender);
        current.retire();
        *current = sender;
    }
    {
        let mut current = lock(&shared.receiver);
        current.close();
        *current = receiver;
    }
    *lock(&shared.peer) = peer;
    shared
        .state
        .transition(SessionState::Handshaking, SessionState::TcpActive);
    Ok(())
}
