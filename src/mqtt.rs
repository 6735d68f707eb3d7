use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;

use crate::config;
use crate::ingest::device_id_from_topic;
use crate::publish::{Channel, PublishError, Publisher};
use crate::scheduler::Command;

const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    device_prefix: String,
    device_filter: String,
    majority_topic: String,
    snapshot_topic: String,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

impl MqttClient {
    pub fn new(
        config: &config::MqttConfig,
        topics: &config::TopicConfig,
    ) -> (Self, rumqttc::EventLoop) {
        let client_id = config.client_id();
        let mut mqttoptions = MqttOptions::new(client_id, config.host(), config.port());

        mqttoptions.set_keep_alive(config.keep_alive());

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, REQUEST_CAPACITY);

        (
            MqttClient {
                client,
                device_prefix: topics.device_prefix().to_string(),
                device_filter: topics.device_filter(),
                majority_topic: topics.majority().to_string(),
                snapshot_topic: topics.snapshot().to_string(),
                reconnect_delay: config.reconnect_delay(),
                max_reconnect_delay: config.max_reconnect_delay(),
            },
            eventloop,
        )
    }

    fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Majority => &self.majority_topic,
            Channel::Snapshot => &self.snapshot_topic,
        }
    }

    /// Polls the connection, forwarding device reports to the aggregator.
    ///
    /// Connection errors back off exponentially before the next poll
    /// reconnects. Returns once a requested disconnect has gone out, which is
    /// after everything queued before it.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        commands: mpsc::Sender<Command>,
    ) {
        let mut backoff = self.reconnect_delay;
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    Event::Incoming(Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        let Some(device_id) = device_id_from_topic(&p.topic, &self.device_prefix)
                        else {
                            warn!("Ignoring message on unexpected topic {}", p.topic);
                            continue;
                        };
                        let command = Command::Report {
                            device_id: device_id.to_string(),
                            payload: p.payload.to_vec(),
                        };
                        if commands.send(command).await.is_err() {
                            debug!("Aggregator stopped, dropping report from {}", device_id);
                        }
                    }
                    Event::Incoming(Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    Event::Incoming(Packet::ConnAck(_)) => {
                        info!("Connected to MQTT broker");
                        backoff = self.reconnect_delay;
                        // clean sessions forget subscriptions across reconnects
                        let filter = &self.device_filter;
                        match self.client.try_subscribe(filter, QoS::AtMostOnce) {
                            Ok(()) => info!("Subscribed to {}", filter),
                            Err(err) => error!("Error subscribing to {}: {:?}", filter, err),
                        }
                    }
                    Event::Outgoing(Outgoing::Disconnect) => {
                        info!("Disconnected from MQTT broker");
                        break;
                    }
                    _ => {}
                },
                Err(e) => {
                    error!(
                        "Error polling MQTT event loop: {:?}, retrying in {:?}",
                        e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, self.max_reconnect_delay);
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

/// Doubles the reconnect delay, capped at `max`.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

impl Publisher for MqttClient {
    fn publish(&self, channel: Channel, payload: &[u8], retain: bool) -> Result<(), PublishError> {
        let topic = self.topic(channel);
        debug!("Publishing {} bytes to {} (retain={})", payload.len(), topic, retain);
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())?;
        Ok(())
    }
}
