//! Validation of inbound device reports.
//!
//! Identity comes from the topic (`<prefix>/<device id>/state`); any id inside
//! the body is informational only. Anything that fails the schema is logged
//! and dropped without touching the registry.

use log::{debug, warn};
use serde_derive::Deserialize;
use serde_json::Value;

use crate::registry::DeviceRegistry;
use crate::state::{DeviceState, UnknownState};
use crate::timestamp;

const OFFLINE: &str = "offline";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing state")]
    MissingState,
    #[error(transparent)]
    UnknownState(#[from] UnknownState),
    #[error("non-numeric ts {0}")]
    InvalidTimestamp(Value),
    #[error("empty device id")]
    MissingDeviceId,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    ts: Option<Value>,
    #[serde(default, rename = "signalStrength")]
    signal_strength: Option<Value>,
    #[serde(default)]
    rssi: Option<Value>,
    #[serde(default)]
    device_id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Offline,
    State {
        state: DeviceState,
        ts: Option<i64>,
        signal_strength: Option<i64>,
    },
}

#[derive(Debug)]
pub enum IngestOutcome {
    Updated,
    Removed,
    AlreadyOffline,
    Rejected(IngestError),
}

/// Extracts the device id from `<prefix>/<device id>/state`.
pub fn device_id_from_topic<'a>(topic: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let id = rest.strip_suffix("/state")?;
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(id)
    }
}

pub fn parse_report(raw: &[u8]) -> Result<Report, IngestError> {
    let value: Value = serde_json::from_slice(raw)?;
    if !value.is_object() {
        return Err(IngestError::NotAnObject);
    }
    let raw: RawReport = serde_json::from_value(value)?;

    let status_offline = raw.status.as_ref().and_then(Value::as_str) == Some(OFFLINE);
    if status_offline || raw.state.as_deref() == Some(OFFLINE) {
        return Ok(Report::Offline);
    }

    let state: DeviceState = raw.state.ok_or(IngestError::MissingState)?.parse()?;

    let ts = match raw.ts {
        None | Some(Value::Null) => None,
        // non-integers can't be epoch seconds; the sanitizer treats them as absent
        Some(Value::Number(n)) => n.as_i64(),
        Some(other) => return Err(IngestError::InvalidTimestamp(other)),
    };

    let signal_strength = raw
        .signal_strength
        .as_ref()
        .and_then(Value::as_i64)
        .or_else(|| raw.rssi.as_ref().and_then(Value::as_i64));

    if let Some(body_id) = raw.device_id {
        debug!("Report carries body id {}", body_id);
    }

    Ok(Report::State {
        state,
        ts,
        signal_strength,
    })
}

/// Applies one report to the registry.
pub fn handle(
    registry: &mut DeviceRegistry,
    device_id: &str,
    raw: &[u8],
    now: i64,
) -> IngestOutcome {
    if device_id.is_empty() {
        warn!("Ignoring report without a device id");
        return IngestOutcome::Rejected(IngestError::MissingDeviceId);
    }

    let report = match parse_report(raw) {
        Ok(report) => report,
        Err(err) => {
            warn!("Ignoring report from {}: {}", device_id, err);
            return IngestOutcome::Rejected(err);
        }
    };

    match report {
        Report::Offline => {
            if registry.remove(device_id) {
                debug!("Device {} went offline", device_id);
                IngestOutcome::Removed
            } else {
                IngestOutcome::AlreadyOffline
            }
        }
        Report::State {
            state,
            ts,
            signal_strength,
        } => {
            // a clock running ahead must not outlive the TTL
            let observed_at = timestamp::sanitize(ts, now).min(now);
            if ts.is_some_and(|reported| reported != observed_at) {
                debug!(
                    "Corrected timestamp for {} from {:?} to {}",
                    device_id, ts, observed_at
                );
            }
            registry.upsert(device_id, state, observed_at, signal_strength);
            debug!(
                "Updated device {}: state={}, ts={}, rssi={:?}",
                device_id, state, observed_at, signal_strength
            );
            IngestOutcome::Updated
        }
    }
}
