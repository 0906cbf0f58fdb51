//! Per-channel tally state computation

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::mapping::{ChannelIndex, InputMap};
use crate::snapshot::BusSnapshot;

/// State of a single tally light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TallyState {
    None,
    Preview,
    Program,
}

/// Which bus wins when a channel's identifiers are on both at once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precedence {
    #[default]
    Program,
    Preview,
}

impl Precedence {
    fn rank(self, state: TallyState) -> u8 {
        match (self, state) {
            (_, TallyState::None) => 0,
            (Precedence::Program, TallyState::Preview) => 1,
            (Precedence::Program, TallyState::Program) => 2,
            (Precedence::Preview, TallyState::Program) => 1,
            (Precedence::Preview, TallyState::Preview) => 2,
        }
    }

    fn resolve(self, current: TallyState, candidate: TallyState) -> TallyState {
        if self.rank(candidate) > self.rank(current) {
            candidate
        } else {
            current
        }
    }
}

// One channel's entry on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TallyEntry {
    pub channel: ChannelIndex,
    pub state: TallyState,
}

/// Tally state of every configured channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallyVector(BTreeMap<ChannelIndex, TallyState>);

impl TallyVector {
    pub fn get(&self, channel: ChannelIndex) -> Option<TallyState> {
        self.0.get(&channel).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in ascending channel order
    pub fn entries(&self) -> Vec<TallyEntry> {
        self.0
            .iter()
            .map(|(channel, state)| TallyEntry {
                channel: *channel,
                state: *state,
            })
            .collect()
    }

    /// Count of channels in `state`
    pub fn count(&self, state: TallyState) -> usize {
        self.0.values().filter(|s| **s == state).count()
    }
}

impl FromIterator<TallyEntry> for TallyVector {
    fn from_iter<I: IntoIterator<Item = TallyEntry>>(iter: I) -> Self {
        Self(iter.into_iter().map(|e| (e.channel, e.state)).collect())
    }
}

/// Compute the state of every channel in `map`.
///
/// A channel lights PROGRAM or PREVIEW if any identifier mapped to it is on
/// that bus. Collisions resolve by `precedence`.
pub fn compute(
    program: &BusSnapshot,
    preview: &BusSnapshot,
    map: &InputMap,
    precedence: Precedence,
) -> TallyVector {
    let mut states: BTreeMap<ChannelIndex, TallyState> = map
        .channels()
        .iter()
        .map(|channel| (*channel, TallyState::None))
        .collect();

    for (id, channel) in map.iter() {
        let slot = states.entry(channel).or_insert(TallyState::None);
        if program.contains(id) {
            *slot = precedence.resolve(*slot, TallyState::Program);
        }
        if preview.contains(id) {
            *slot = precedence.resolve(*slot, TallyState::Preview);
        }
    }

    TallyVector(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::SwitcherId;

    fn map(pairs: &[(u32, ChannelIndex)]) -> InputMap {
        InputMap::new(
            pairs
                .iter()
                .map(|(input, channel)| (SwitcherId::Input(*input), *channel))
                .collect(),
        )
        .unwrap()
    }

    fn inputs(ids: &[u32]) -> BusSnapshot {
        ids.iter().map(|n| SwitcherId::Input(*n)).collect()
    }

    #[test]
    fn test_program_and_preview() {
        let map = map(&[(101, 0), (102, 1)]);
        let vector = compute(&inputs(&[101]), &inputs(&[102]), &map, Precedence::Program);

        assert_eq!(vector.get(0), Some(TallyState::Program));
        assert_eq!(vector.get(1), Some(TallyState::Preview));
        assert_eq!(vector.len(), 2);
    }

    #[test]
    fn test_multiple_live_inputs() {
        let map = map(&[(101, 0), (102, 1)]);
        let vector = compute(&inputs(&[101, 102]), &inputs(&[]), &map, Precedence::Program);

        assert_eq!(vector.get(0), Some(TallyState::Program));
        assert_eq!(vector.get(1), Some(TallyState::Program));
    }

    #[test]
    fn test_unmapped_identifier_ignored() {
        let map = map(&[(101, 0), (102, 1)]);
        let base = compute(&inputs(&[]), &inputs(&[102]), &map, Precedence::Program);
        let with_unmapped = compute(&inputs(&[999]), &inputs(&[102]), &map, Precedence::Program);

        assert_eq!(base, with_unmapped);
        assert_eq!(with_unmapped.get(0), Some(TallyState::None));
    }

    #[test]
    fn test_total_over_channels() {
        let map = map(&[(1, 0), (2, 0), (3, 4), (7, 9)]);

        for (program, preview) in [
            (inputs(&[]), inputs(&[])),
            (inputs(&[1, 3, 7]), inputs(&[2])),
            (inputs(&[42]), inputs(&[1, 2, 3, 7])),
        ] {
            let vector = compute(&program, &preview, &map, Precedence::Program);
            let channels: Vec<ChannelIndex> = vector.entries().iter().map(|e| e.channel).collect();
            assert_eq!(channels, vec![0, 4, 9]);
        }
    }

    #[test]
    fn test_program_wins_collision() {
        // Same identifier on both busses
        let single = map(&[(1, 0)]);
        let vector = compute(&inputs(&[1]), &inputs(&[1]), &single, Precedence::Program);
        assert_eq!(vector.get(0), Some(TallyState::Program));

        // Two identifiers on one channel, split across busses, in either order
        let shared = map(&[(1, 0), (2, 0)]);
        let a = compute(&inputs(&[1]), &inputs(&[2]), &shared, Precedence::Program);
        let b = compute(&inputs(&[2]), &inputs(&[1]), &shared, Precedence::Program);
        assert_eq!(a.get(0), Some(TallyState::Program));
        assert_eq!(b.get(0), Some(TallyState::Program));
    }

    #[test]
    fn test_preview_precedence_flag() {
        let map = map(&[(1, 0), (2, 0), (3, 1)]);
        let vector = compute(&inputs(&[1, 3]), &inputs(&[2]), &map, Precedence::Preview);

        assert_eq!(vector.get(0), Some(TallyState::Preview));
        assert_eq!(vector.get(1), Some(TallyState::Program));
    }

    #[test]
    fn test_entries_serialize_lowercase() {
        let vector: TallyVector = [
            TallyEntry { channel: 1, state: TallyState::Preview },
            TallyEntry { channel: 0, state: TallyState::Program },
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&vector.entries()).unwrap();
        assert_eq!(
            json,
            r#"[{"channel":0,"state":"program"},{"channel":1,"state":"preview"}]"#
        );
        assert_eq!(vector.count(TallyState::None), 0);
    }
}
