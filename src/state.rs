use std::fmt;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

/// Colour a device can report. A device without a registry record is offline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Blue,
    Green,
    Yellow,
    Red,
}

impl DeviceState {
    /// Fixed ordering used for counting and tie-breaking. The first entry is
    /// also the majority of an empty room.
    pub const ALL: [DeviceState; 4] = [
        DeviceState::Blue,
        DeviceState::Green,
        DeviceState::Yellow,
        DeviceState::Red,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Blue => "blue",
            DeviceState::Green => "green",
            DeviceState::Yellow => "yellow",
            DeviceState::Red => "red",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state {0:?}")]
pub struct UnknownState(pub String);

impl FromStr for DeviceState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}
