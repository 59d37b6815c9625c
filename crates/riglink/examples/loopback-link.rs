//! Server and client linked over loopback, exchanging simulated vectors.
//!
//! Run with:
//!   cargo run --example loopback-link --features sim
//!
//! Pass `udp` as the first argument to move traffic to UDP after the
//! handshake.

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use riglink::peer::{connect, ClientConfig, Identity, Link, LinkOptions, RigListener, Ticker};
use riglink::source::{SimulatedSource, VectorSource};

const SERVER: Identity = Identity::new(2, 6, 3);
const CLIENT: Identity = Identity::new(0, 3, 6);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let udp = std::env::args().nth(1).is_some_and(|arg| arg == "udp");

    let listener = RigListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)), SERVER)?;
    let addr = listener.local_addr();
    eprintln!("Listening on {addr}");

    let server = thread::spawn(move || listener.accept());
    let mut client = connect(&ClientConfig::new(addr, CLIENT))?;
    let mut server = server.join().map_err(|_| "server thread panicked")??;
    eprintln!("Handshake done: server sees {}", server.peer().name);

    if udp {
        server.switch_to_udp()?;
        client.switch_to_udp()?;
    }

    let server = Link::start(server, LinkOptions::default())?;
    let client = Link::start(client, LinkOptions::default())?;

    let mut client_input = SimulatedSource::new(CLIENT.outputs as usize, 2);
    let mut server_input = SimulatedSource::new(SERVER.outputs as usize, 2);
    let mut ticker = Ticker::new(Duration::from_millis(20));

    for _ in 0..50 {
        ticker.wait();
        // Client speaks first so a UDP server learns its address.
        client.send_tick(&client_input.next_vector())?;
        let _ = server.send_tick(&server_input.next_vector());

        if ticker.ticks() % 10 == 0 {
            eprintln!(
                "tick {}: server got {:?}, client got {:?}",
                ticker.ticks(),
                server.latest(),
                client.latest()
            );
        }
    }

    eprintln!("server stats: {:?}", server.stats());
    eprintln!("client stats: {:?}", client.stats());
    Ok(())
}
