//! Synthetic device traffic for local testing of the aggregator.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use log::{error, info, warn};
use rand::Rng as _;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use serde_derive::Serialize;

use majority_rs::state::DeviceState;

#[derive(Parser, Debug)]
#[command(about = "Publishes fake device colour reports")]
struct Args {
    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    #[arg(long, default_value = "mugs")]
    device_prefix: String,

    #[arg(long, default_value_t = 8)]
    devices: usize,

    /// Bias reports towards this colour
    #[arg(long)]
    major: Option<String>,

    /// Device id to mark offline instead of simulating
    #[arg(long)]
    offline: Option<String>,
}

#[derive(Serialize)]
struct DeviceReport<'a> {
    device_id: &'a str,
    state: DeviceState,
    rssi: i64,
    ts: i64,
}

fn pick_state(bias: Option<DeviceState>) -> DeviceState {
    let weight = |state: DeviceState| if Some(state) == bias { 4 } else { 1 };
    let total: u32 = DeviceState::ALL.iter().map(|s| weight(*s)).sum();
    let mut target = rand::thread_rng().gen_range(0..total);
    for state in DeviceState::ALL {
        if target < weight(state) {
            return state;
        }
        target -= weight(state);
    }
    DeviceState::ALL[0]
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

async fn simulate_device(
    client: AsyncClient,
    topic: String,
    device_id: String,
    bias: Option<DeviceState>,
) {
    loop {
        let delay = Duration::from_millis(rand::thread_rng().gen_range(1000..2000));
        tokio::time::sleep(delay).await;

        let report = DeviceReport {
            device_id: &device_id,
            state: pick_state(bias),
            rssi: -50 - rand::thread_rng().gen_range(0..25),
            ts: now(),
        };
        let payload = match serde_json::to_vec(&report) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Failed to encode report for {}: {}", device_id, err);
                continue;
            }
        };
        if let Err(err) = client.publish(&topic, QoS::AtMostOnce, true, payload).await {
            error!("Failed to publish state for {}: {:?}", device_id, err);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let args = Args::parse();

    let bias = match args.major.as_deref().map(str::parse::<DeviceState>) {
        Some(Ok(state)) => {
            info!("Biasing majority colour towards {}", state);
            Some(state)
        }
        Some(Err(err)) => {
            warn!("Ignoring unsupported major colour: {}", err);
            None
        }
        None => None,
    };

    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    let mut options = MqttOptions::new(
        format!("simulator-{suffix:06x}"),
        args.mqtt_host.clone(),
        args.mqtt_port,
    );
    options.set_keep_alive(Duration::from_secs(5));
    let (client, mut eventloop) = AsyncClient::new(options, 64);

    if let Some(offline) = &args.offline {
        client
            .publish(
                format!("{}/{}/state", args.device_prefix, offline),
                QoS::AtMostOnce,
                true,
                r#"{"status":"offline"}"#,
            )
            .await?;
        info!("Marked {} as offline", offline);
    }

    let devices = (1..=args.devices)
        .map(|i| format!("mug-{i:03}"))
        .filter(|id| Some(id) != args.offline.as_ref());
    for device_id in devices {
        let topic = format!("{}/{}/state", args.device_prefix, device_id);
        tokio::spawn(simulate_device(client.clone(), topic, device_id, bias));
    }

    info!(
        "Simulator connecting to mqtt://{}:{}",
        args.mqtt_host, args.mqtt_port
    );
    let mut shutting_down = false;
    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(err) => {
                    error!("Simulator connection error: {:?}", err);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            },
            _ = tokio::signal::ctrl_c(), if !shutting_down => {
                info!("Simulator shutting down");
                shutting_down = true;
                if let Err(err) = client.try_disconnect() {
                    error!("Error disconnecting simulator: {:?}", err);
                    break;
                }
            }
        }
    }

    Ok(())
}
