mod connection;
mod transport;
mod weather;

use anyhow::Context;
use clap::Parser;
use connection::{StationUplink, UplinkConfig, UplinkEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use transport::TcpConnector;
use weather::WeatherGenerator;
use weather_shared::protocol::DEFAULT_SERVER_ADDR;
use weather_shared::reading::validate_station_id;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Simulated weather stations streaming readings to the collection server
#[derive(Parser, Debug)]
#[command(name = "weather-station", version)]
struct Args {
    /// Collection server address
    #[arg(long, env = "WEATHER_SERVER", default_value = DEFAULT_SERVER_ADDR)]
    server: String,

    /// Milliseconds between readings per station
    #[arg(long, env = "WEATHER_INTERVAL_MS", default_value_t = 1500)]
    interval_ms: u64,

    /// RNG seed; 0 draws from OS entropy
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Stop each station after this many readings
    #[arg(long)]
    count: Option<u64>,

    /// Station ids, e.g. station01_coastal
    #[arg(required = true)]
    station_ids: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    for id in &args.station_ids {
        validate_station_id(id).with_context(|| format!("station id {:?}", id))?;
    }
    anyhow::ensure!(args.interval_ms > 0, "--interval-ms must be positive");

    let config = UplinkConfig {
        send_interval: Duration::from_millis(args.interval_ms),
        max_readings: args.count,
        ..Default::default()
    };

    info!(
        "Starting {} station(s) against {}",
        args.station_ids.len(),
        args.server
    );

    let (event_tx, mut event_rx) = mpsc::channel::<UplinkEvent>(256);
    let event_counter = tokio::spawn(async move {
        let mut sent = 0u64;
        while let Some(event) = event_rx.recv().await {
            if let UplinkEvent::Sent { .. } = event {
                sent += 1;
            }
        }
        sent
    });

    let uplinks = args.station_ids.iter().enumerate().map(|(i, id)| {
        let seed = match args.seed {
            0 => 0,
            seed => seed.wrapping_add(i as u64),
        };
        let uplink = StationUplink::new(
            config.clone(),
            TcpConnector::new(args.server.clone()),
            WeatherGenerator::new(id.clone(), seed),
        )
        .with_events(event_tx.clone());
        async move {
            let station = uplink.station_id().to_string();
            match uplink.run().await {
                Ok(sent) => info!(station = %station, "Finished after {} reading(s)", sent),
                Err(e) => error!(station = %station, "Station stopped: {}", e),
            }
        }
    });
    let all_stations = futures::future::join_all(uplinks);
    drop(event_tx);

    tokio::select! {
        _ = all_stations => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown requested");
        }
    }

    // Uplinks are dropped by now, closing the event channel
    let sent = event_counter.await.context("event counter task")?;
    info!("Sent {} reading(s) in total", sent);
    Ok(())
}
