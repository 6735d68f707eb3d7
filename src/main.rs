use std::time::Duration;

use clap::Parser as _;
use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot};

use majority_rs::cli::Cli;
use majority_rs::clock::SystemClock;
use majority_rs::registry::DeviceRegistry;
use majority_rs::scheduler::{self, Aggregator, Command};
use majority_rs::{http, mqtt};

const COMMAND_BUFFER: usize = 256;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let config = cli.load_config()?;

    // nothing else starts if the accessor can't have its port
    let listener = http::bind(&config.http).await?;

    let (mqtt_client, mut eventloop) = mqtt::MqttClient::new(&config.mqtt, &config.topics);
    info!(
        "Connecting to mqtt://{}:{}",
        config.mqtt.host(),
        config.mqtt.port()
    );

    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let aggregator = Aggregator::new(
        DeviceRegistry::new(config.aggregator.ttl_seconds()),
        mqtt_client.clone(),
        SystemClock,
    );
    let engine = tokio::spawn(aggregator.run(rx));

    let mqtt_task = {
        let client = mqtt_client.clone();
        let tx = tx.clone();
        tokio::spawn(async move { client.event_loop(&mut eventloop, tx).await })
    };
    let ticker = scheduler::spawn_ticker(tx.clone(), config.aggregator.tick_period());

    let (stop_http, http_stopped) = oneshot::channel::<()>();
    let mut http_task = tokio::spawn(http::serve(listener, tx.clone(), async move {
        let _ = http_stopped.await;
    }));

    let mut http_failure = None;
    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut http_task => {
            http_failure = Some(match result {
                Ok(Ok(())) => anyhow::anyhow!("http server stopped unexpectedly"),
                Ok(Err(err)) => anyhow::Error::from(err).context("http server failed"),
                Err(err) => anyhow::Error::from(err).context("http server panicked"),
            });
        }
    }
    info!("shutting down");

    if http_failure.is_none() {
        let _ = stop_http.send(());
        if let Err(err) = http_task.await {
            error!("Error stopping http server: {:?}", err);
        }
    }

    ticker.abort();
    // reports and ticks already queued still run before this
    if tx.send(Command::Shutdown).await.is_err() {
        warn!("Aggregator already stopped");
    }
    if let Err(err) = engine.await {
        error!("Aggregator task failed: {:?}", err);
    }

    if let Err(err) = mqtt_client.disconnect().await {
        error!("Error disconnecting from MQTT: {:?}", err);
    }
    match tokio::time::timeout(DRAIN_TIMEOUT, mqtt_task).await {
        Ok(Ok(())) => info!("MQTT publishes drained"),
        Ok(Err(err)) => error!("MQTT task failed: {:?}", err),
        Err(_) => warn!("Gave up draining MQTT after {:?}", DRAIN_TIMEOUT),
    }

    match http_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Error listening for ctrl-c: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Error listening for SIGTERM: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
