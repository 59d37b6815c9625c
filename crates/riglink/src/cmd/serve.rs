use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use riglink::peer::{Link, LinkOptions, RigListener};
use riglink::source::SimulatedSource;
use tracing::info;

use crate::cmd::{control_loop, install_ctrlc_handler, ServeArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_peer, print_stats, OutputFormat};

/// Default server identity: the motion platform.
const SERVER_ID: i32 = 2;

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let settings = args.link.resolve(SERVER_ID)?;

    let listener = RigListener::bind(args.bind, settings.identity)
        .map_err(|err| session_error("bind failed", err))?
        .with_transport_config(settings.transport.clone())
        .with_handshake_config(settings.handshake.clone())
        .with_session_config(settings.session.clone());
    info!(addr = %listener.local_addr(), local = %settings.identity, "waiting for client");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut session = listener
        .accept()
        .map_err(|err| session_error("handshake failed", err))?;
    if settings.udp {
        session
            .switch_to_udp()
            .map_err(|err| session_error("switch to UDP failed", err))?;
    }
    print_peer(session.peer(), session.mode().as_str(), format);

    let mut source = SimulatedSource::new(session.peer().send_slots(), args.control.decimals);
    let mut link = Link::start(session, LinkOptions::default())
        .map_err(|err| session_error("link start failed", err))?;

    control_loop(
        &link,
        &mut source,
        settings.rate_hz,
        &args.control,
        &running,
        format,
    );

    link.stop();
    print_stats(&link.stats(), format);
    Ok(SUCCESS)
}
