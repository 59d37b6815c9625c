use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use riglink::peer::{connect, ClientConfig, Link, LinkOptions};
use riglink::source::SimulatedSource;
use riglink::transport::RetryPolicy;
use tracing::info;

use crate::cmd::{control_loop, install_ctrlc_handler, DriveArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_peer, print_stats, OutputFormat};

/// Default client identity: the simulator.
const CLIENT_ID: i32 = 0;

pub fn run(args: DriveArgs, format: OutputFormat) -> CliResult<i32> {
    let settings = args.link.resolve(CLIENT_ID)?;

    let retry = RetryPolicy::default()
        .with_interval(args.retry_interval)
        .with_max_attempts(args.max_attempts);
    let config = ClientConfig::new(args.remote, settings.identity)
        .with_transport_config(settings.transport.clone())
        .with_retry(retry)
        .with_handshake_config(settings.handshake.clone())
        .with_session_config(settings.session.clone());

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!(remote = %args.remote, local = %settings.identity, "connecting");
    let mut session = connect(&config).map_err(|err| session_error("connect failed", err))?;
    if settings.udp {
        session
            .switch_to_udp()
            .map_err(|err| session_error("switch to UDP failed", err))?;
    }
    print_peer(session.peer(), session.mode().as_str(), format);

    let mut options = LinkOptions::default();
    if let Some(interval) = args.reconnect_interval.or(settings.reconnect_interval) {
        options = options.with_reconnect_interval(interval);
    }
    if !args.no_reconnect {
        options = options.with_reconnect(config);
    }

    let mut source = SimulatedSource::new(session.peer().send_slots(), args.control.decimals);
    let mut link =
        Link::start(session, options).map_err(|err| session_error("link start failed", err))?;

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
