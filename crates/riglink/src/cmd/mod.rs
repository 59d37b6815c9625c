use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use riglink::frame::{ChecksumKind, SlotFormat};
use riglink::peer::{Link, SessionError, SessionState, Ticker};
use riglink::source::VectorSource;
use riglink::transport::TransportError;
use tracing::{debug, info};

use crate::config::{parse_duration, LinkArgs, DEFAULT_DECIMALS};
use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::{print_vector, OutputFormat};

pub mod drive;
pub mod dump;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait for a client, handshake and run the link as the server.
    Serve(ServeArgs),
    /// Connect to a server and drive it with simulated input.
    Drive(DriveArgs),
    /// Print the records of a recording file.
    Dump(DumpArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Drive(args) => drive::run(args, format),
        Command::Dump(args) => dump::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Control loop flags shared by `serve` and `drive`.
#[derive(Args, Debug, Clone)]
pub struct LoopArgs {
    /// Print the latest received vector every N ticks (0 disables).
    #[arg(long, default_value = "10")]
    pub print_every: u64,
    /// Exit after printing N vectors.
    #[arg(long)]
    pub count: Option<u64>,
    /// Exit after N ticks.
    #[arg(long)]
    pub ticks: Option<u64>,
    /// Decimals kept by the simulated input.
    #[arg(long, default_value_t = DEFAULT_DECIMALS)]
    pub decimals: u32,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,
    #[command(flatten)]
    pub link: LinkArgs,
    #[command(flatten)]
    pub control: LoopArgs,
}

#[derive(Args, Debug)]
pub struct DriveArgs {
    /// Server address.
    pub remote: SocketAddr,
    #[command(flatten)]
    pub link: LinkArgs,
    #[command(flatten)]
    pub control: LoopArgs,
    /// Wait between refused connection attempts.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub retry_interval: Duration,
    /// Give up after N connection attempts (default: retry forever).
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Supervisor polling interval after a connection loss.
    #[arg(long, value_parser = parse_duration)]
    pub reconnect_interval: Option<Duration>,
    /// Do not reconnect after a connection loss.
    #[arg(long)]
    pub no_reconnect: bool,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Recording file.
    pub path: PathBuf,
    /// Values per recorded frame.
    #[arg(long)]
    pub slots: usize,
    /// Slot encoding: i8, i16 or f64.
    #[arg(long, default_value = "i8")]
    pub slot_format: SlotFormat,
    /// Quantization scale used when recording.
    #[arg(long)]
    pub scale: Option<f64>,
    /// Frames carry a sequence number.
    #[arg(long)]
    pub sequenced: bool,
    /// Checksum algorithm: xor or sum8.
    #[arg(long, default_value = "xor")]
    pub checksum: ChecksumKind,
    /// Print at most N records.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Send one vector per tick and print what arrives until a limit, Ctrl-C or
/// the link closing ends the loop.
pub(crate) fn control_loop(
    link: &Link,
    source: &mut dyn VectorSource,
    rate_hz: f64,
    args: &LoopArgs,
    running: &AtomicBool,
    format: OutputFormat,
) {
    let mut ticker = Ticker::from_rate(rate_hz);
    let mut printed = 0u64;
    let mut last_received = 0u64;

    while running.load(Ordering::SeqCst) {
        if link.state() == SessionState::Closed {
            info!("link closed");
            break;
        }
        ticker.wait();

        match link.send_tick(&source.next_vector()) {
            Ok(()) => {}
            // A UDP server learns the peer address from its first datagram.
            Err(SessionError::Transport(TransportError::NoPeerAddress)) => {}
            Err(err) => debug!(error = %err, state = %link.state(), "send failed"),
        }

        let tick = ticker.ticks();
        if args.print_every > 0 && tick % args.print_every == 0 {
            let received = link.stats().received;
            if received != last_received {
                last_received = received;
                if let Some(values) = link.latest() {
                    print_vector(tick, &values, link.latest_age(), format);
                    printed += 1;
                }
            }
        }

        if args.count.is_some_and(|count| printed >= count)
            || args.ticks.is_some_and(|ticks| tick >= ticks)
        {
            break;
        }
    }

    if ticker.missed() > 0 {
        info!(missed = ticker.missed(), "control loop fell behind");
    }
}
