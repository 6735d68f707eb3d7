use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;

use crate::config::AppConfig;

const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Aggregates device colour reports into a retained majority view.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// TOML config file. Defaults to ./config.toml when present.
    #[arg(short, long, env = "AGGREGATOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: Option<String>,

    #[arg(long, env = "MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    /// Seconds without a report before a device is dropped
    #[arg(long, env = "TTL_SECONDS")]
    pub ttl_seconds: Option<u64>,

    #[arg(long, env = "TICK_SECONDS")]
    pub tick_seconds: Option<u64>,

    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,
}

impl Cli {
    /// File config (if any) with command-line and environment values on top.
    pub fn load_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                AppConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                info!("No config file, using defaults");
                AppConfig::default()
            }
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.mqtt_host {
            config.mqtt.host = Some(host.clone());
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = Some(port);
        }
        if let Some(ttl) = self.ttl_seconds {
            config.aggregator.ttl_seconds = Some(ttl);
        }
        if let Some(tick) = self.tick_seconds {
            config.aggregator.tick_seconds = Some(tick);
        }
        if let Some(port) = self.http_port {
            config.http.port = Some(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file() {
        // built directly so exported MQTT_PORT etc. can't leak in
        let cli = Cli {
            config: None,
            mqtt_host: Some("broker.local".to_string()),
            mqtt_port: None,
            ttl_seconds: Some(25),
            tick_seconds: None,
            http_port: Some(8080),
        };
        let mut config: AppConfig = toml::de::from_str(
            r#"
            [mqtt]
            host = "ignored"
            port = 1999
            [aggregator]
            ttl_seconds = 5
            "#,
        )
        .unwrap();
        cli.apply(&mut config);

        assert_eq!(config.mqtt.host(), "broker.local");
        assert_eq!(config.mqtt.port(), 1999);
        assert_eq!(config.aggregator.ttl_seconds(), 25);
        assert_eq!(config.http.port(), 8080);
    }

    #[test]
    fn test_missing_explicit_config_is_fatal() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/majority.toml")),
            mqtt_host: None,
            mqtt_port: None,
            ttl_seconds: None,
            tick_seconds: None,
            http_port: None,
        };
        assert!(cli.load_config().is_err());
    }
}
