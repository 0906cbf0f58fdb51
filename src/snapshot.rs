//! Bus snapshots and change detection
//!
//! The upstream adapters re-emit identical state on unrelated internal
//! events. Snapshots compare by set membership so only real changes reach
//! the tally computer.

use std::collections::BTreeSet;
use std::fmt;

use crate::mapping::SwitcherId;

/// Switcher output bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bus {
    Program,
    Preview,
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bus::Program => f.write_str("program"),
            Bus::Preview => f.write_str("preview"),
        }
    }
}

/// Identifiers visible on one bus at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusSnapshot(BTreeSet<SwitcherId>);

impl BusSnapshot {
    pub fn contains(&self, id: &SwitcherId) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<SwitcherId> for BusSnapshot {
    fn from_iter<I: IntoIterator<Item = SwitcherId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<SwitcherId>> for BusSnapshot {
    fn from(ids: Vec<SwitcherId>) -> Self {
        ids.into_iter().collect()
    }
}

impl fmt::Display for BusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", id)?;
        }
        f.write_str("}")
    }
}

/// Whether `fresh` differs from `previous` in membership
pub fn detect(previous: &BusSnapshot, fresh: &BusSnapshot) -> bool {
    previous != fresh
}

/// Cached program and preview snapshots
#[derive(Debug, Clone, Default)]
pub struct BusState {
    program: BusSnapshot,
    preview: BusSnapshot,
}

impl BusState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(&self) -> &BusSnapshot {
        &self.program
    }

    pub fn preview(&self) -> &BusSnapshot {
        &self.preview
    }

    /// Replace the cached snapshot for `bus` if it changed.
    ///
    /// Returns true when the cache was updated.
    pub fn update(&mut self, bus: Bus, fresh: BusSnapshot) -> bool {
        let cached = match bus {
            Bus::Program => &mut self.program,
            Bus::Preview => &mut self.preview,
        };
        if detect(cached, &fresh) {
            *cached = fresh;
            true
        } else {
            false
        }
    }
}
