use std::net::SocketAddr;
use std::thread;

use bytes::Bytes;
use riglink_transport::{connect, Listener, Transport, TransportConfig, TransportError};

pub(crate) fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().expect("loopback address should parse")
}

/// Connected server/client transports over loopback TCP.
pub(crate) fn tcp_pair() -> (Transport, Transport) {
    let listener = Listener::bind(loopback()).expect("listener should bind");
    let addr = listener.local_addr();
    let client = thread::spawn(move || {
        connect(addr, TransportConfig::default()).expect("client should connect")
    });
    let server = listener
        .accept(TransportConfig::default())
        .expect("listener should accept");
    (server, client.join().expect("client thread should complete"))
}

/// Read, retrying read timeouts.
pub(crate) fn read_blocking(transport: &mut Transport, len: usize) -> Bytes {
    for _ in 0..100 {
        match transport.read(len) {
            Ok(bytes) => return bytes,
            Err(TransportError::TimedOut) => continue,
            Err(err) => panic!("read failed: {err}"),
        }
    }
    panic!("no data after 100 read timeouts");
}
