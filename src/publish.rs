use std::collections::HashMap;

use log::debug;

/// Outbound channels the aggregator writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Majority,
    Snapshot,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(#[from] rumqttc::ClientError),
    #[error("publish rejected: {0}")]
    Rejected(String),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fire-and-forget sink for serialized payloads. Implementations must not
/// block waiting on the broker.
pub trait Publisher: Send + 'static {
    fn publish(&self, channel: Channel, payload: &[u8], retain: bool) -> Result<(), PublishError>;
}

/// Drops payloads that are byte-identical to the last one sent on a channel.
///
/// The cache lives as long as the process, so a restarted aggregator always
/// re-announces on its first tick.
pub struct PublishDeduplicator<P> {
    publisher: P,
    last_sent: HashMap<Channel, Vec<u8>>,
}

impl<P: Publisher> PublishDeduplicator<P> {
    pub fn new(publisher: P) -> Self {
        PublishDeduplicator {
            publisher,
            last_sent: HashMap::new(),
        }
    }

    /// Returns whether a publish actually went out. A failed send is not
    /// remembered, so the next identical payload is attempted again.
    pub fn maybe_publish(
        &mut self,
        channel: Channel,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<bool, PublishError> {
        if self.last_sent.get(&channel) == Some(&payload) {
            debug!("Suppressing unchanged {:?} payload", channel);
            return Ok(false);
        }
        self.publisher.publish(channel, &payload, retain)?;
        self.last_sent.insert(channel, payload);
        Ok(true)
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

#[cfg(test)]
pub use recording::{RecordingPublisher, Sent};

#[cfg(test)]
mod recording {
    use std::sync::{Arc, Mutex};

    use super::{Channel, PublishError, Publisher};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Sent {
        pub channel: Channel,
        pub payload: String,
        pub retain: bool,
    }

    /// Publisher that keeps everything it was asked to send. Clones share the
    /// same log; `fail_next` makes the next send error out.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingPublisher {
        sent: Arc<Mutex<Vec<Sent>>>,
        fail_next: Arc<Mutex<bool>>,
    }

    impl RecordingPublisher {
        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_on(&self, channel: Channel) -> Vec<Sent> {
            self.sent()
                .into_iter()
                .filter(|s| s.channel == channel)
                .collect()
        }

        pub fn last_json(&self, channel: Channel) -> Option<serde_json::Value> {
            self.sent_on(channel)
                .last()
                .map(|s| serde_json::from_str(&s.payload).unwrap())
        }

        pub fn fail_next(&self) {
            *self.fail_next.lock().unwrap() = true;
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(
            &self,
            channel: Channel,
            payload: &[u8],
            retain: bool,
        ) -> Result<(), PublishError> {
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(PublishError::Rejected("broker unavailable".to_string()));
            }
            self.sent.lock().unwrap().push(Sent {
                channel,
                payload: String::from_utf8(payload.to_vec()).unwrap(),
                retain,
            });
            Ok(())
        }
    }
}
