//! Static switcher identifier -> tally channel table

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::ConfigError;

/// Index of one physical tally light
pub type ChannelIndex = u16;

/// Switcher-side entity that can appear on a bus.
///
/// Hardware routers address inputs by number, software compositors by
/// source name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SwitcherId {
    Input(u32),
    Source(String),
}

impl fmt::Display for SwitcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitcherId::Input(n) => write!(f, "input {}", n),
            SwitcherId::Source(name) => write!(f, "source \"{}\"", name),
        }
    }
}

/// Immutable many-to-one mapping from switcher identifiers to channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMap {
    entries: BTreeMap<SwitcherId, ChannelIndex>,
    channels: BTreeSet<ChannelIndex>,
}

impl InputMap {
    pub fn new(entries: BTreeMap<SwitcherId, ChannelIndex>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyMapping);
        }
        let channels = entries.values().copied().collect();
        Ok(Self { entries, channels })
    }

    /// Build a table keyed by numeric router/mixer inputs.
    ///
    /// Keys come from JSON object keys, so they arrive as strings and must
    /// parse as unsigned integers.
    pub fn from_numeric_keys<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a String, &'a ChannelIndex)>,
    {
        let mut entries = BTreeMap::new();
        for (key, channel) in pairs {
            let input: u32 = key
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidMappingKey(key.clone()))?;
            entries.insert(SwitcherId::Input(input), *channel);
        }
        Self::new(entries)
    }

    /// Build a table keyed by compositor source names
    pub fn from_source_names<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a String, &'a ChannelIndex)>,
    {
        let entries = pairs
            .into_iter()
            .map(|(name, channel)| (SwitcherId::Source(name.clone()), *channel))
            .collect();
        Self::new(entries)
    }

    pub fn channel_for(&self, id: &SwitcherId) -> Option<ChannelIndex> {
        self.entries.get(id).copied()
    }

    /// Every configured channel, ascending
    pub fn channels(&self) -> &BTreeSet<ChannelIndex> {
        &self.channels
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SwitcherId, ChannelIndex)> {
        self.entries.iter().map(|(id, channel)| (id, *channel))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
