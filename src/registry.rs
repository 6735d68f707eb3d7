use std::collections::BTreeMap;

use log::debug;

use crate::state::DeviceState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub state: DeviceState,
    pub observed_at: i64,
    pub signal_strength: Option<i64>,
}

impl DeviceRecord {
    pub fn age(&self, now: i64) -> i64 {
        now - self.observed_at
    }
}

/// Last known state of every device, keyed by device id.
///
/// Records are kept in id order so that anything serialized from a snapshot
/// is byte-stable for identical contents.
#[derive(Debug)]
pub struct DeviceRegistry {
    ttl_seconds: i64,
    devices: BTreeMap<String, DeviceRecord>,
    dirty: bool,
}

impl DeviceRegistry {
    pub fn new(ttl_seconds: u64) -> Self {
        DeviceRegistry {
            ttl_seconds: i64::try_from(ttl_seconds).unwrap_or(i64::MAX),
            devices: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Replaces whatever was recorded for `id`. Last write wins, no merging.
    pub fn upsert(
        &mut self,
        id: &str,
        state: DeviceState,
        observed_at: i64,
        signal_strength: Option<i64>,
    ) {
        self.devices.insert(
            id.to_string(),
            DeviceRecord {
                id: id.to_string(),
                state,
                observed_at,
                signal_strength,
            },
        );
        self.dirty = true;
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.devices.remove(id).is_some();
        self.dirty |= removed;
        removed
    }

    /// Evicts every record older than the TTL. Returns whether anything went.
    pub fn prune(&mut self, now: i64) -> bool {
        let ttl = self.ttl_seconds;
        let before = self.devices.len();
        self.devices.retain(|id, record| {
            let age = record.age(now);
            if age > ttl {
                debug!(
                    "Pruning device {}: age={}s, ts={}, now={}",
                    id, age, record.observed_at, now
                );
                false
            } else {
                true
            }
        });
        let removed = self.devices.len() != before;
        self.dirty |= removed;
        removed
    }

    pub fn snapshot(&self) -> BTreeMap<String, DeviceRecord> {
        self.devices.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_760_000_000;
    const TTL: u64 = 10;

    #[test]
    fn test_upsert_replaces_record() {
        let mut registry = DeviceRegistry::new(TTL);
        registry.upsert("mug-001", DeviceState::Blue, NOW - 3, Some(-60));
        registry.upsert("mug-001", DeviceState::Red, NOW, None);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        let record = &snapshot["mug-001"];
        assert_eq!(record.state, DeviceState::Red);
        assert_eq!(record.observed_at, NOW);
        assert_eq!(record.signal_strength, None);
        assert!(registry.is_dirty());
    }

    #[test]
    fn test_remove_marks_dirty_only_on_removal() {
        let mut registry = DeviceRegistry::new(TTL);
        assert!(!registry.remove("ghost"));
        assert!(!registry.is_dirty());

        registry.upsert("mug-001", DeviceState::Green, NOW, None);
        registry.clear_dirty();
        assert!(registry.remove("mug-001"));
        assert!(registry.is_dirty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_prune_evicts_only_expired() {
        let ttl = TTL as i64;
        let mut registry = DeviceRegistry::new(TTL);
        registry.upsert("expired", DeviceState::Blue, NOW - (ttl + 1), None);
        registry.upsert("fresh", DeviceState::Blue, NOW - (ttl - 1), None);
        registry.upsert("boundary", DeviceState::Blue, NOW - ttl, None);
        registry.clear_dirty();

        assert!(registry.prune(NOW));
        assert!(registry.is_dirty());
        let snapshot = registry.snapshot();
        assert!(!snapshot.contains_key("expired"));
        assert!(snapshot.contains_key("fresh"));
        assert!(snapshot.contains_key("boundary"));
    }

    #[test]
    fn test_prune_without_expiry_stays_clean() {
        let mut registry = DeviceRegistry::new(TTL);
        registry.upsert("mug-001", DeviceState::Yellow, NOW, None);
        registry.clear_dirty();

        assert!(!registry.prune(NOW + 5));
        assert!(!registry.is_dirty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_newer_report_resets_age_window() {
        let mut registry = DeviceRegistry::new(TTL);
        registry.upsert("mug-001", DeviceState::Blue, NOW - 8, None);
        registry.upsert("mug-001", DeviceState::Blue, NOW, None);

        assert!(!registry.prune(NOW + 9));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut registry = DeviceRegistry::new(TTL);
        registry.upsert("mug-001", DeviceState::Blue, NOW, None);
        let snapshot = registry.snapshot();

        registry.upsert("mug-001", DeviceState::Red, NOW, None);
        registry.upsert("mug-002", DeviceState::Red, NOW, None);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["mug-001"].state, DeviceState::Blue);
    }
}
