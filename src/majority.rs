use std::collections::BTreeMap;

use serde_derive::Serialize;

use crate::registry::DeviceRecord;
use crate::state::DeviceState;

/// Number of online devices per state. Serializes in the fixed state order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub blue: u32,
    pub green: u32,
    pub yellow: u32,
    pub red: u32,
}

impl StateCounts {
    pub fn get(&self, state: DeviceState) -> u32 {
        match state {
            DeviceState::Blue => self.blue,
            DeviceState::Green => self.green,
            DeviceState::Yellow => self.yellow,
            DeviceState::Red => self.red,
        }
    }

    fn increment(&mut self, state: DeviceState) {
        let slot = match state {
            DeviceState::Blue => &mut self.blue,
            DeviceState::Green => &mut self.green,
            DeviceState::Yellow => &mut self.yellow,
            DeviceState::Red => &mut self.red,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u32 {
        DeviceState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MajorityView {
    pub winning_state: DeviceState,
    pub counts: StateCounts,
    pub online_total: u32,
    pub computed_at: i64,
}

impl MajorityView {
    /// Same winner and counts, regardless of when either view was computed.
    pub fn same_outcome(&self, other: &MajorityView) -> bool {
        self.winning_state == other.winning_state && self.counts == other.counts
    }
}

/// Counts records by state and picks the winner.
///
/// Ties go to whichever state comes first in [`DeviceState::ALL`], so the
/// result never depends on registry iteration order. An empty room reports
/// the first state with all counts at zero.
pub fn compute(records: &BTreeMap<String, DeviceRecord>, now: i64) -> MajorityView {
    let mut counts = StateCounts::default();
    for record in records.values() {
        counts.increment(record.state);
    }

    let mut winning_state = DeviceState::ALL[0];
    let mut max_count = counts.get(winning_state);
    for state in DeviceState::ALL.into_iter().skip(1) {
        let count = counts.get(state);
        if count > max_count {
            winning_state = state;
            max_count = count;
        }
    }

    MajorityView {
        winning_state,
        counts,
        online_total: counts.total(),
        computed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_760_000_000;

    fn records(states: &[(&str, DeviceState)]) -> BTreeMap<String, DeviceRecord> {
        states
            .iter()
            .map(|(id, state)| {
                (
                    id.to_string(),
                    DeviceRecord {
                        id: id.to_string(),
                        state: *state,
                        observed_at: NOW,
                        signal_strength: Some(-60),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_room_defaults_to_first_state() {
        let view = compute(&BTreeMap::new(), NOW);
        assert_eq!(view.winning_state, DeviceState::Blue);
        assert_eq!(view.counts, StateCounts::default());
        assert_eq!(view.online_total, 0);
        assert_eq!(view.computed_at, NOW);
    }

    #[test]
    fn test_tie_goes_to_earlier_state() {
        let view = compute(
            &records(&[
                ("d", DeviceState::Green),
                ("c", DeviceState::Green),
                ("b", DeviceState::Blue),
                ("a", DeviceState::Blue),
            ]),
            NOW,
        );
        assert_eq!(view.winning_state, DeviceState::Blue);
        assert_eq!(view.counts.blue, 2);
        assert_eq!(view.counts.green, 2);
    }

    #[test]
    fn test_tie_between_later_states() {
        let view = compute(
            &records(&[
                ("a", DeviceState::Red),
                ("b", DeviceState::Yellow),
                ("c", DeviceState::Red),
                ("d", DeviceState::Yellow),
                ("e", DeviceState::Blue),
            ]),
            NOW,
        );
        assert_eq!(view.winning_state, DeviceState::Yellow);
    }

    #[test]
    fn test_strict_majority_wins() {
        let input = records(&[
            ("a", DeviceState::Green),
            ("b", DeviceState::Green),
            ("c", DeviceState::Green),
            ("d", DeviceState::Blue),
            ("e", DeviceState::Blue),
        ]);
        let view = compute(&input, NOW);
        assert_eq!(view.winning_state, DeviceState::Green);
        assert_eq!(view.online_total, 5);
        assert_eq!(view.online_total as usize, input.len());

        // pure: same input, same answer
        assert_eq!(compute(&input, NOW), view);
    }
}
