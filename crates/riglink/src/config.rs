//! Link settings from a JSON file and command-line flags.
//!
//! Flags override the file, the file overrides built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use riglink::frame::{ChecksumKind, SlotFormat};
use riglink::peer::{HandshakeConfig, Identity, IdentityRegistry, SessionConfig};
use riglink::record::{RecorderConfig, DEFAULT_CAPACITY};
use riglink::transport::TransportConfig;
use serde::Deserialize;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID};

pub const DEFAULT_SLOTS: u32 = 20;
pub const DEFAULT_RATE_HZ: f64 = 20.0;
pub const DEFAULT_DECIMALS: u32 = 3;

/// Parse `150ms`, `5s`, `2m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    let (number, unit) = if let Some(value) = trimmed.strip_suffix("ms") {
        (value, "ms")
    } else if let Some(value) = trimmed.strip_suffix('s') {
        (value, "s")
    } else if let Some(value) = trimmed.strip_suffix('m') {
        (value, "m")
    } else {
        (trimmed, "s")
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        _ => Duration::from_secs(value),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordSection {
    pub dir: Option<PathBuf>,
    pub base_name: Option<String>,
    pub capacity: Option<usize>,
}

/// Per-id handshake behaviour overriding the built-in profiles.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileSection {
    pub extension: Option<bool>,
    pub slot_format: Option<String>,
}

/// Contents of a `--config` file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub id: Option<i32>,
    pub inputs: Option<u32>,
    pub outputs: Option<u32>,
    pub slot_format: Option<String>,
    pub scale: Option<f64>,
    pub sequenced: Option<bool>,
    pub checksum: Option<String>,
    pub udp: Option<bool>,
    pub extension: Option<Vec<i32>>,
    pub allow_unknown: Option<bool>,
    pub rate_hz: Option<f64>,
    pub handshake_timeout: Option<String>,
    pub read_timeout: Option<String>,
    pub reconnect_interval: Option<String>,
    /// Extra id to name entries merged into the default registry.
    pub names: BTreeMap<i32, String>,
    pub profiles: BTreeMap<i32, ProfileSection>,
    pub record: Option<RecordSection>,
}

impl FileConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed to read {}", path.display()), err))?;
        Self::parse(&text)
            .map_err(|err| CliError::new(DATA_INVALID, format!("{}: {err}", path.display())))
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Flags shared by `serve` and `drive`.
#[derive(Args, Debug, Default, Clone)]
pub struct LinkArgs {
    /// JSON file with link settings.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Local identity id.
    #[arg(long)]
    pub id: Option<i32>,
    /// Values received per tick.
    #[arg(long)]
    pub inputs: Option<u32>,
    /// Values sent per tick.
    #[arg(long)]
    pub outputs: Option<u32>,
    /// Slot encoding: i8, i16 or f64.
    #[arg(long, value_name = "FORMAT")]
    pub slot_format: Option<SlotFormat>,
    /// Quantization scale (defaults to the format maximum).
    #[arg(long)]
    pub scale: Option<f64>,
    /// Prefix frames with a sequence number.
    #[arg(long)]
    pub sequenced: bool,
    /// Checksum algorithm: xor or sum8.
    #[arg(long)]
    pub checksum: Option<ChecksumKind>,
    /// Move traffic to UDP after the handshake.
    #[arg(long)]
    pub udp: bool,
    /// Handshake extension arguments (comma-separated, up to three).
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub extension: Option<Vec<i32>>,
    /// Reject peers whose id is not in the registry.
    #[arg(long)]
    pub strict_ids: bool,
    /// Record sent frames into this directory.
    #[arg(long, value_name = "DIR")]
    pub record: Option<PathBuf>,
    /// Records buffered before each flush.
    #[arg(long)]
    pub record_capacity: Option<usize>,
    /// Control loop rate in Hz.
    #[arg(long)]
    pub rate: Option<f64>,
    /// Handshake deadline (e.g. 5s, 500ms).
    #[arg(long, value_parser = parse_duration)]
    pub handshake_timeout: Option<Duration>,
    /// Socket read timeout (e.g. 100ms).
    #[arg(long, value_parser = parse_duration)]
    pub read_timeout: Option<Duration>,
}

/// Fully resolved link settings.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub identity: Identity,
    pub transport: TransportConfig,
    pub handshake: HandshakeConfig,
    pub session: SessionConfig,
    pub udp: bool,
    pub rate_hz: f64,
    pub reconnect_interval: Option<Duration>,
}

impl LinkArgs {
    pub fn resolve(&self, default_id: i32) -> CliResult<LinkSettings> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        self.resolve_with(file, default_id)
    }

    pub fn resolve_with(&self, file: FileConfig, default_id: i32) -> CliResult<LinkSettings> {
        let identity = Identity::new(
            self.id.or(file.id).unwrap_or(default_id),
            self.inputs.or(file.inputs).unwrap_or(DEFAULT_SLOTS),
            self.outputs.or(file.outputs).unwrap_or(DEFAULT_SLOTS),
        );

        let format = match (self.slot_format, &file.slot_format) {
            (Some(format), _) => format,
            (None, Some(text)) => text.parse().map_err(CliError::usage)?,
            (None, None) => SlotFormat::default(),
        };
        let checksum = match (self.checksum, &file.checksum) {
            (Some(checksum), _) => checksum,
            (None, Some(text)) => text.parse().map_err(CliError::usage)?,
            (None, None) => ChecksumKind::default(),
        };

        let mut session = SessionConfig::default()
            .with_format(format)
            .with_checksum(checksum)
            .with_sequence(self.sequenced || file.sequenced.unwrap_or(false));
        if let Some(scale) = self.scale.or(file.scale) {
            session = session.with_scale(scale);
        }
        session
            .layout(identity.outputs as usize)
            .validate()
            .map_err(|err| CliError::usage(format!("invalid frame settings: {err}")))?;

        let record = file.record.unwrap_or_default();
        if let Some(dir) = self.record.clone().or(record.dir) {
            let capacity = self
                .record_capacity
                .or(record.capacity)
                .unwrap_or(DEFAULT_CAPACITY);
            let mut recorder = RecorderConfig::new(dir).with_capacity(capacity);
            if let Some(base_name) = record.base_name {
                recorder = recorder.with_base_name(base_name);
            }
            session = session.with_recorder(recorder);
        }

        let mut registry = IdentityRegistry::default();
        for (id, name) in file.names {
            registry.insert(id, name);
        }
        for (id, section) in file.profiles {
            let mut profile = registry.profile(id);
            if let Some(extension) = section.extension {
                profile = profile.with_extension(extension);
            }
            if let Some(text) = section.slot_format {
                profile = profile.with_format(text.parse().map_err(CliError::usage)?);
            }
            registry.set_profile(id, profile);
        }
        let mut handshake = HandshakeConfig::default()
            .with_registry(registry)
            .with_allow_unknown(!self.strict_ids && file.allow_unknown.unwrap_or(true));
        if let Some(timeout) = pick_duration(self.handshake_timeout, &file.handshake_timeout)? {
            handshake = handshake.with_timeout(timeout);
        }
        if let Some(args) = self.extension.as_ref().or(file.extension.as_ref()) {
            handshake = handshake
                .with_extension_args(args)
                .map_err(|err| CliError::usage(err.to_string()))?;
        }

        let mut transport = TransportConfig::default();
        if let Some(timeout) = pick_duration(self.read_timeout, &file.read_timeout)? {
            transport.read_timeout = Some(timeout);
        }

        let rate_hz = self.rate.or(file.rate_hz).unwrap_or(DEFAULT_RATE_HZ);
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(CliError::usage(format!("rate must be positive, got {rate_hz}")));
        }

        Ok(LinkSettings {
            identity,
            transport,
            handshake,
            session,
            udp: self.udp || file.udp.unwrap_or(false),
            rate_hz,
            reconnect_interval: pick_duration(None, &file.reconnect_interval)?,
        })
    }
}

fn pick_duration(flag: Option<Duration>, file: &Option<String>) -> CliResult<Option<Duration>> {
    match (flag, file) {
        (Some(duration), _) => Ok(Some(duration)),
        (None, Some(text)) => parse_duration(text).map(Some).map_err(CliError::usage),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("150ms"), Ok(Duration::from_millis(150)));
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn defaults_without_file_or_flags() {
        let settings = LinkArgs::default()
            .resolve_with(FileConfig::default(), 2)
            .expect("defaults should resolve");
        assert_eq!(settings.identity, Identity::new(2, 20, 20));
        assert_eq!(settings.session.format, SlotFormat::I8);
        assert!(settings.session.recorder.is_none());
        assert!(settings.handshake.allow_unknown);
        assert!(!settings.udp);
        assert_eq!(settings.rate_hz, DEFAULT_RATE_HZ);
    }

    #[test]
    fn flags_override_file() {
        let file = FileConfig::parse(
            r#"{
                "id": 3,
                "inputs": 8,
                "outputs": 4,
                "slot_format": "i16",
                "udp": true,
                "extension": [1, 2],
                "handshake_timeout": "2s",
                "names": {"7": "Crane"},
                "profiles": {"7": {"extension": true}, "1": {"slot_format": "i16"}},
                "record": {"dir": "rec", "capacity": 10}
            }"#,
        )
        .expect("config should parse");

        let args = LinkArgs {
            outputs: Some(6),
            slot_format: Some(SlotFormat::F64),
            strict_ids: true,
            ..LinkArgs::default()
        };
        let settings = args.resolve_with(file, 1).expect("settings should resolve");

        assert_eq!(settings.identity, Identity::new(3, 8, 6));
        assert_eq!(settings.session.format, SlotFormat::F64);
        assert!(settings.udp);
        assert!(!settings.handshake.allow_unknown);
        assert_eq!(settings.handshake.extension, Some([1, 2, 0]));
        assert_eq!(settings.handshake.timeout, Duration::from_secs(2));
        assert_eq!(settings.handshake.registry.name_of(7), "Crane");
        let crane = settings.handshake.registry.profile(7);
        assert_eq!(crane.extension, Some(true));
        assert_eq!(crane.format, None);
        let mevea = settings.handshake.registry.profile(1);
        assert_eq!(mevea.extension, Some(false));
        assert_eq!(mevea.format, Some(SlotFormat::I16));
        let recorder = settings.session.recorder.expect("recorder configured");
        assert_eq!(recorder.dir, PathBuf::from("rec"));
        assert_eq!(recorder.capacity, 10);
    }

    #[test]
    fn rejects_bad_settings() {
        let too_many = LinkArgs {
            extension: Some(vec![1, 2, 3, 4]),
            ..LinkArgs::default()
        };
        assert_eq!(
            too_many.resolve_with(FileConfig::default(), 1).unwrap_err().code,
            crate::exit::USAGE
        );

        let bad_scale = LinkArgs {
            scale: Some(1000.0),
            ..LinkArgs::default()
        };
        assert!(bad_scale.resolve_with(FileConfig::default(), 1).is_err());

        assert!(FileConfig::parse(r#"{"colour": "red"}"#).is_err());
    }
}
