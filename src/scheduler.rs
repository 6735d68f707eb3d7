//! The aggregation engine and its tick loop.
//!
//! One task owns the registry. Device reports, ticks and stats queries all
//! arrive as [`Command`]s on a single channel and run in arrival order, so no
//! two mutations ever overlap.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, error, info};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::ingest::{self, IngestOutcome};
use crate::majority::{self, MajorityView, StateCounts};
use crate::publish::{Channel, PublishDeduplicator, PublishError, Publisher};
use crate::registry::DeviceRegistry;
use crate::state::DeviceState;
use crate::stats::StatsView;

#[derive(Debug)]
pub enum Command {
    Report { device_id: String, payload: Vec<u8> },
    Tick,
    Stats(oneshot::Sender<StatsView>),
    Shutdown,
}

#[derive(Debug, Serialize)]
struct MajorityCounts {
    #[serde(flatten)]
    per_state: StateCounts,
    online: u32,
}

/// Retained majority message. `ts` is when the winner or counts last
/// changed, not when this tick ran.
#[derive(Debug, Serialize)]
struct MajorityPayload {
    state: DeviceState,
    counts: MajorityCounts,
    ts: i64,
}

impl From<&MajorityView> for MajorityPayload {
    fn from(view: &MajorityView) -> Self {
        MajorityPayload {
            state: view.winning_state,
            counts: MajorityCounts {
                per_state: view.counts,
                online: view.online_total,
            },
            ts: view.computed_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct SnapshotEntry {
    state: DeviceState,
    ts: i64,
    #[serde(rename = "signalStrength")]
    signal_strength: Option<i64>,
}

/// What a single tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub pruned: bool,
    pub majority_published: bool,
    pub snapshot_published: bool,
}

pub struct Aggregator<P, C> {
    registry: DeviceRegistry,
    dedup: PublishDeduplicator<P>,
    clock: C,
    last_majority: Option<MajorityView>,
}

impl<P: Publisher, C: Clock> Aggregator<P, C> {
    pub fn new(registry: DeviceRegistry, publisher: P, clock: C) -> Self {
        Aggregator {
            registry,
            dedup: PublishDeduplicator::new(publisher),
            clock,
            last_majority: None,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn publisher(&self) -> &P {
        self.dedup.publisher()
    }

    pub fn ingest(&mut self, device_id: &str, payload: &[u8]) -> IngestOutcome {
        let now = self.clock.now();
        ingest::handle(&mut self.registry, device_id, payload, now)
    }

    /// Prune, recompute the majority and republish whatever changed.
    ///
    /// The majority keeps the timestamp of the tick on which its outcome last
    /// changed, so an unchanged room serializes to the same bytes every tick.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let pruned = self.registry.prune(now);
        let records = self.registry.snapshot();

        let view = majority::compute(&records, now);
        let view = match self.last_majority.take() {
            Some(previous) if previous.same_outcome(&view) => previous,
            _ => {
                info!(
                    "majority={} online={}",
                    view.winning_state, view.online_total
                );
                view
            }
        };
        let majority_published = self
            .send(Channel::Majority, &MajorityPayload::from(&view), true)
            .unwrap_or(false);
        self.last_majority = Some(view);

        let mut snapshot_published = false;
        if self.registry.is_dirty() {
            let snapshot: BTreeMap<&str, SnapshotEntry> = records
                .values()
                .map(|record| {
                    (
                        record.id.as_str(),
                        SnapshotEntry {
                            state: record.state,
                            ts: record.observed_at,
                            signal_strength: record.signal_strength,
                        },
                    )
                })
                .collect();
            // stay dirty on failure so the next tick tries again
            if let Some(published) = self.send(Channel::Snapshot, &snapshot, false) {
                snapshot_published = published;
                self.registry.clear_dirty();
            }
        }

        TickReport {
            pruned,
            majority_published,
            snapshot_published,
        }
    }

    pub fn stats(&self) -> StatsView {
        StatsView::from_snapshot(&self.registry.snapshot(), self.clock.now())
    }

    fn send<T: Serialize>(&mut self, channel: Channel, payload: &T, retain: bool) -> Option<bool> {
        let result = serde_json::to_vec(payload)
            .map_err(PublishError::from)
            .and_then(|bytes| self.dedup.maybe_publish(channel, bytes, retain));
        match result {
            Ok(published) => Some(published),
            Err(err) => {
                error!("Error publishing {:?}: {}", channel, err);
                None
            }
        }
    }

    /// Drains commands until `Shutdown` arrives or every sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Report { device_id, payload } => {
                    self.ingest(&device_id, &payload);
                }
                Command::Tick => {
                    self.tick();
                }
                Command::Stats(reply) => {
                    if reply.send(self.stats()).is_err() {
                        debug!("Stats requester went away");
                    }
                }
                Command::Shutdown => {
                    info!("Aggregator shutting down");
                    break;
                }
            }
        }
    }
}

/// Enqueues a `Tick` every `period`, the first one immediately.
pub fn spawn_ticker(commands: mpsc::Sender<Command>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if commands.send(Command::Tick).await.is_err() {
                debug!("Command channel closed, stopping ticker");
                break;
            }
        }
    })
}
