use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use weather_server::config::Args;
use weather_server::{Dispatcher, Registry, StationReporter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = Args::parse().into_config()?;
    let registry = Arc::new(Registry::new());

    let handle = Dispatcher::new(config.clone(), Arc::clone(&registry))
        .start()
        .await?;
    info!("Weather server running on {}", handle.local_addr());

    if let Some(report_interval) = config.report_interval {
        let reporter = StationReporter::new(
            Arc::clone(&registry),
            handle.session_manager(),
            handle.stats(),
            report_interval,
        );
        tokio::spawn(reporter.run(handle.shutdown_token()));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let report = handle.stop().await;
    info!(
        "Server stopped: {} session(s) drained, {} aborted, {} station(s) known",
        report.drained,
        report.aborted,
        registry.len()
    );
    Ok(())
}
