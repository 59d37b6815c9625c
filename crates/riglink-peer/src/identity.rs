use std::collections::BTreeMap;
use std::fmt;

use riglink_frame::SlotFormat;

/// Name reported for ids missing from the registry.
pub const UNDEFINED_NAME: &str = "undefined";

/// Role id and vector sizes announced during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: i32,
    /// Values this endpoint receives per tick.
    pub inputs: u32,
    /// Values this endpoint sends per tick.
    pub outputs: u32,
}

impl Identity {
    pub const fn new(id: i32, inputs: u32, outputs: u32) -> Self {
        Self {
            id,
            inputs,
            outputs,
        }
    }

    /// Whether `peer` sends what we expect and expects what we send.
    pub fn mirrors(&self, peer: &Identity) -> bool {
        peer.outputs == self.inputs && peer.inputs == self.outputs
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id {} ({} inputs, {} outputs)",
            self.id, self.inputs, self.outputs
        )
    }
}

/// How a particular peer type speaks the protocol.
///
/// Legacy simulators send only the three base handshake fields and use
/// 8-byte doubles; newer rigs exchange extension arguments and quantized
/// slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerProfile {
    /// Whether this peer sends and expects extension arguments. `None`
    /// follows the local handshake configuration.
    pub extension: Option<bool>,
    /// Slot format for frames exchanged with this peer. `None` keeps the
    /// session's configured format.
    pub format: Option<SlotFormat>,
}

impl PeerProfile {
    /// Base handshake only, frames in `format`.
    pub const fn legacy(format: SlotFormat) -> Self {
        Self {
            extension: Some(false),
            format: Some(format),
        }
    }

    pub fn with_extension(mut self, extension: bool) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn with_format(mut self, format: SlotFormat) -> Self {
        self.format = Some(format);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    profile: PeerProfile,
}

/// Maps role ids to display names and protocol profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRegistry {
    entries: BTreeMap<i32, Entry>,
}

impl IdentityRegistry {
    /// A registry with no known ids.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with(mut self, id: i32, name: impl Into<String>) -> Self {
        self.insert(id, name);
        self
    }

    pub fn with_profile(mut self, id: i32, profile: PeerProfile) -> Self {
        self.set_profile(id, profile);
        self
    }

    /// Register or rename `id`. A renamed id keeps its profile.
    pub fn insert(&mut self, id: i32, name: impl Into<String>) {
        let name = name.into();
        self.entries
            .entry(id)
            .and_modify(|entry| entry.name.clone_from(&name))
            .or_insert_with(|| Entry {
                name,
                profile: PeerProfile::default(),
            });
    }

    /// Set the profile of `id`; unregistered ids are added as undefined.
    pub fn set_profile(&mut self, id: i32, profile: PeerProfile) {
        self.entries
            .entry(id)
            .or_insert_with(|| Entry {
                name: UNDEFINED_NAME.to_string(),
                profile: PeerProfile::default(),
            })
            .profile = profile;
    }

    pub fn get(&self, id: i32) -> Option<&str> {
        self.entries.get(&id).map(|entry| entry.name.as_str())
    }

    pub fn contains(&self, id: i32) -> bool {
        self.entries.contains_key(&id)
    }

    /// Registered name, or [`UNDEFINED_NAME`].
    pub fn name_of(&self, id: i32) -> &str {
        self.get(id).unwrap_or(UNDEFINED_NAME)
    }

    /// Registered profile, or the default one.
    pub fn profile(&self, id: i32) -> PeerProfile {
        self.entries
            .get(&id)
            .map(|entry| entry.profile)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &str)> {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.name.as_str()))
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::empty()
            .with(0, "Excavator")
            .with(1, "Mevea")
            .with_profile(1, PeerProfile::legacy(SlotFormat::F64))
            .with(2, "Motion Platform")
            .with(3, "Digicenter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_names() {
        let registry = IdentityRegistry::default();
        assert_eq!(registry.name_of(1), "Mevea");
        assert_eq!(registry.name_of(2), "Motion Platform");
        assert_eq!(registry.name_of(42), UNDEFINED_NAME);
        assert_eq!(registry.iter().count(), 4);
    }

    #[test]
    fn profiles_follow_ids() {
        let mut registry = IdentityRegistry::default();
        assert_eq!(registry.profile(1), PeerProfile::legacy(SlotFormat::F64));
        assert_eq!(registry.profile(2), PeerProfile::default());
        assert_eq!(registry.profile(42), PeerProfile::default());

        registry.insert(1, "Simulator");
        assert_eq!(registry.name_of(1), "Simulator");
        assert_eq!(registry.profile(1).format, Some(SlotFormat::F64));

        registry.set_profile(9, PeerProfile::default().with_extension(true));
        assert!(registry.contains(9));
        assert_eq!(registry.name_of(9), UNDEFINED_NAME);
        assert_eq!(registry.profile(9).extension, Some(true));
    }

    #[test]
    fn mirrored_sizes() {
        let local = Identity::new(2, 20, 8);
        assert!(local.mirrors(&Identity::new(1, 8, 20)));
        assert!(!local.mirrors(&Identity::new(1, 20, 8)));
    }
}
