use std::io::IsTerminal;
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use riglink::peer::{LinkStats, NegotiatedPeer};
use riglink::record::RecordEntry;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn join_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| format!("{value:.3}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Serialize)]
struct PeerOutput<'a> {
    event: &'static str,
    id: i32,
    name: &'a str,
    inputs: u32,
    outputs: u32,
    mode: &'a str,
    extra_args: Option<[i32; 3]>,
}

pub fn print_peer(peer: &NegotiatedPeer, mode: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&PeerOutput {
            event: "connected",
            id: peer.identity.id,
            name: &peer.name,
            inputs: peer.identity.inputs,
            outputs: peer.identity.outputs,
            mode,
            extra_args: peer.extra_args,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["PEER", "NAME", "INPUTS", "OUTPUTS", "MODE"]);
            table.add_row(vec![
                peer.identity.id.to_string(),
                peer.name.clone(),
                peer.identity.inputs.to_string(),
                peer.identity.outputs.to_string(),
                mode.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "connected to {} ({}) over {mode}",
            peer.name, peer.identity
        ),
    }
}

#[derive(Serialize)]
struct VectorOutput<'a> {
    event: &'static str,
    tick: u64,
    age_ms: Option<u128>,
    values: &'a [f64],
}

pub fn print_vector(tick: u64, values: &[f64], age: Option<Duration>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&VectorOutput {
            event: "vector",
            tick,
            age_ms: age.map(|age| age.as_millis()),
            values,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["TICK", "AGE", "VALUES"]);
            table.add_row(vec![
                tick.to_string(),
                age.map(|age| format!("{}ms", age.as_millis()))
                    .unwrap_or_else(|| "-".to_string()),
                join_values(values),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("tick={tick} values=[{}]", join_values(values)),
    }
}

#[derive(Serialize)]
struct StatsOutput {
    event: &'static str,
    sent: u64,
    send_errors: u64,
    received: u64,
    keepalives: u64,
    discarded: u64,
    timeouts: u64,
    disconnects: u64,
    reconnects: u64,
    reconnect_failures: u64,
    recording_rolled_over: bool,
}

impl From<&LinkStats> for StatsOutput {
    fn from(stats: &LinkStats) -> Self {
        Self {
            event: "stats",
            sent: stats.sent,
            send_errors: stats.send_errors,
            received: stats.received,
            keepalives: stats.keepalives,
            discarded: stats.discarded,
            timeouts: stats.timeouts,
            disconnects: stats.disconnects,
            reconnects: stats.reconnects,
            reconnect_failures: stats.reconnect_failures,
            recording_rolled_over: stats.recording_rolled_over,
        }
    }
}

pub fn print_stats(stats: &LinkStats, format: OutputFormat) {
    let out = StatsOutput::from(stats);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["COUNTER", "VALUE"]);
            for (name, value) in [
                ("sent", out.sent),
                ("send_errors", out.send_errors),
                ("received", out.received),
                ("keepalives", out.keepalives),
                ("discarded", out.discarded),
                ("timeouts", out.timeouts),
                ("disconnects", out.disconnects),
                ("reconnects", out.reconnects),
                ("reconnect_failures", out.reconnect_failures),
            ] {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            table.add_row(vec![
                "recording_rolled_over".to_string(),
                out.recording_rolled_over.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "sent={} received={} discarded={} timeouts={} reconnects={}",
            out.sent, out.received, out.discarded, out.timeouts, out.reconnects
        ),
    }
}

#[derive(Serialize)]
struct RecordOutput<'a> {
    timestamp_us: u64,
    sequence: Option<u32>,
    checksum_ok: bool,
    values: &'a [f64],
}

pub fn print_records(records: &[RecordEntry], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for record in records {
                print_json(&RecordOutput {
                    timestamp_us: record.timestamp_us,
                    sequence: record.sequence,
                    checksum_ok: record.checksum_ok,
                    values: &record.values,
                });
            }
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["TIMESTAMP_US", "SEQ", "CHECKSUM", "VALUES"]);
            for record in records {
                table.add_row(vec![
                    record.timestamp_us.to_string(),
                    record
                        .sequence
                        .map(|seq| seq.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    if record.checksum_ok { "ok" } else { "BAD" }.to_string(),
                    join_values(&record.values),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for record in records {
                let flag = if record.checksum_ok { "" } else { " (bad checksum)" };
                println!(
                    "{} [{}]{flag}",
                    record.timestamp_us,
                    join_values(&record.values)
                );
            }
        }
    }
}
