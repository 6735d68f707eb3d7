use std::collections::BTreeMap;

use serde_derive::Serialize;

use crate::majority::{self, StateCounts};
use crate::registry::DeviceRecord;
use crate::state::DeviceState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub device_id: String,
    pub state: DeviceState,
    #[serde(rename = "ageSec")]
    pub age_sec: i64,
    #[serde(rename = "lastRssi")]
    pub last_rssi: Option<i64>,
}

/// Read-only view served by the `/stats` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsView {
    pub counts: StateCounts,
    pub online: u32,
    pub devices: Vec<DeviceStats>,
    pub ts: i64,
}

impl StatsView {
    pub fn from_snapshot(records: &BTreeMap<String, DeviceRecord>, now: i64) -> Self {
        let view = majority::compute(records, now);
        let devices = records
            .values()
            .map(|record| DeviceStats {
                device_id: record.id.clone(),
                state: record.state,
                age_sec: record.age(now).max(0),
                last_rssi: record.signal_strength,
            })
            .collect();

        StatsView {
            counts: view.counts,
            online: view.online_total,
            devices,
            ts: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;

    #[test]
    fn test_stats_from_snapshot() {
        let now = 1_760_000_000;
        let mut registry = DeviceRegistry::new(10);
        registry.upsert("mug-002", DeviceState::Red, now - 4, Some(-70));
        registry.upsert("mug-001", DeviceState::Red, now + 3, None);

        let stats = StatsView::from_snapshot(&registry.snapshot(), now);
        assert_eq!(stats.online, 2);
        assert_eq!(stats.counts.red, 2);
        assert_eq!(stats.devices[0].device_id, "mug-001");
        assert_eq!(stats.devices[0].age_sec, 0);
        assert_eq!(stats.devices[1].age_sec, 4);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["devices"][1]["lastRssi"], -70);
        assert_eq!(json["devices"][1]["ageSec"], 4);
        assert_eq!(json["counts"]["blue"], 0);
    }
}
