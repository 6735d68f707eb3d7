use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, bail};
use rand::Rng as _;
use serde_derive::Deserialize;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_HTTP_PORT: u16 = 4000;
pub const DEFAULT_TTL_SECONDS: u64 = 10;
pub const DEFAULT_TICK_SECONDS: u64 = 1;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct MqttConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive_seconds: Option<u64>,
    pub reconnect_delay_seconds: Option<u64>,
    pub max_reconnect_delay_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct TopicConfig {
    pub device_prefix: Option<String>,
    pub majority: Option<String>,
    pub snapshot: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AggregatorConfig {
    pub ttl_seconds: Option<u64>,
    pub tick_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct HttpConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.aggregator.ttl_seconds() == 0 {
            bail!("aggregator.ttl_seconds must be greater than zero");
        }
        if self.aggregator.tick_period().is_zero() {
            bail!("aggregator.tick_seconds must be greater than zero");
        }
        if self.mqtt.is_local() && self.mqtt.port() == self.http.port() {
            bail!(
                "http.port {} collides with the local broker port",
                self.http.port()
            );
        }
        Ok(())
    }
}

impl MqttConfig {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_MQTT_PORT)
    }

    fn is_local(&self) -> bool {
        matches!(self.host(), "localhost" | "127.0.0.1" | "::1" | "0.0.0.0")
    }

    /// Configured id, or a fresh `majority-aggregator-xxxxxx` so two instances
    /// never kick each other off the broker.
    pub fn client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
            format!("majority-aggregator-{suffix:06x}")
        })
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds.unwrap_or(5))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds.unwrap_or(2))
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_delay_seconds.unwrap_or(30))
    }
}

impl TopicConfig {
    pub fn device_prefix(&self) -> &str {
        self.device_prefix.as_deref().unwrap_or("mugs")
    }

    pub fn device_filter(&self) -> String {
        format!("{}/+/state", self.device_prefix())
    }

    pub fn majority(&self) -> &str {
        self.majority.as_deref().unwrap_or("dashboard/majority")
    }

    pub fn snapshot(&self) -> &str {
        self.snapshot.as_deref().unwrap_or("dashboard/snapshot")
    }
}

impl AggregatorConfig {
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.unwrap_or(DEFAULT_TICK_SECONDS))
    }
}

impl HttpConfig {
    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or("0.0.0.0")
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind(), self.port())
    }
}
