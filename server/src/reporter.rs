//! Periodic station summary in the log

use crate::registry::Registry;
use crate::session::SessionManager;
use crate::stats::ServerStats;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;
use weather_shared::{now_ms, Reading};

/// Logs a summary of the registry and connection counters on an interval
pub struct StationReporter {
    registry: Arc<Registry>,
    sessions: Arc<SessionManager>,
    stats: Arc<ServerStats>,
    report_interval: Duration,
}

impl StationReporter {
    pub fn new(
        registry: Arc<Registry>,
        sessions: Arc<SessionManager>,
        stats: Arc<ServerStats>,
        report_interval: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            stats,
            report_interval,
        }
    }

    /// Log a summary every interval until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.report(),
            }
        }
    }

    fn report(&self) {
        let stats = self.stats.snapshot();
        info!(
            stations = self.registry.len(),
            connected = self.sessions.count(),
            accepted = stats.readings_accepted,
            stale = stats.readings_stale,
            malformed = stats.frames_malformed,
            rejected = stats.connections_rejected,
            "Telemetry summary"
        );

        for line in summary_lines(&self.registry.snapshot(), now_ms()) {
            info!("  {}", line);
        }
    }
}

/// One line per station, ordered by location then station id
pub fn summary_lines(readings: &[Arc<Reading>], now_ms: u64) -> Vec<String> {
    let mut readings: Vec<&Reading> = readings.iter().map(|r| r.as_ref()).collect();
    readings.sort_by(|a, b| {
        a.location()
            .cmp(b.location())
            .then_with(|| a.station_id().cmp(b.station_id()))
    });

    readings
        .into_iter()
        .map(|r| {
            let age_s = now_ms.saturating_sub(r.timestamp_ms()) / 1000;
            let pressure = r
                .pressure()
                .map(|p| format!(" {:.1}hPa", p))
                .unwrap_or_default();
            format!(
                "{:<12} {:<24} {:>6.1}C {:>5.1}%{} ({}s ago)",
                r.location(),
                r.station_id(),
                r.temperature(),
                r.humidity(),
                pressure,
                age_s
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(station: &str, ts_ms: u64, pressure: Option<f64>) -> Arc<Reading> {
        Arc::new(Reading::new(station, ts_ms, 20.25, 55.0, pressure).expect("valid reading"))
    }

    #[test]
    fn test_summary_sorted_by_location() {
        let readings = vec![
            reading("station03_desert", 10_000, None),
            reading("station01_coastal", 5_000, Some(1012.34)),
            reading("station04", 0, None),
        ];

        let lines = summary_lines(&readings, 20_000);

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("coastal"));
        assert!(lines[0].contains("1012.3hPa"));
        assert!(lines[0].ends_with("(15s ago)"));
        assert!(lines[1].starts_with("desert"));
        assert!(lines[2].starts_with("station04"));
        assert!(!lines[2].contains("hPa"));
    }

    #[test]
    fn test_future_timestamps_do_not_underflow() {
        let lines = summary_lines(&[reading("s", 50_000, None)], 1_000);
        assert!(lines[0].ends_with("(0s ago)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let reporter = StationReporter::new(
            Arc::new(Registry::new()),
            Arc::new(SessionManager::new()),
            Arc::new(ServerStats::new()),
            Duration::from_secs(1),
        );
        let token = CancellationToken::new();
        let task = tokio::spawn(reporter.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel();
        task.await.expect("reporter task");
    }
}
