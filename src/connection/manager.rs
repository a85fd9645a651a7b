//! Station uplink with persistent connection and automatic reconnection

use crate::transport::TransportConnector;
use crate::weather::WeatherGenerator;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use weather_shared::{codec, now_ms, ValidationError};

/// Events emitted by the uplink
#[derive(Debug, Clone, PartialEq)]
pub enum UplinkEvent {
    /// Connected to the server
    Connected,
    /// A reading was written to the server
    Sent { timestamp_ms: u64 },
    /// An established connection was lost
    Disconnected { reason: String },
    /// A connection attempt failed; the next one follows after `retry_in`
    ConnectFailed { reason: String, retry_in: Duration },
}

/// Configuration for a station uplink
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// Time between readings
    pub send_interval: Duration,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Stop after this many readings have been sent
    pub max_readings: Option<u64>,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(1500),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            max_readings: None,
        }
    }
}

/// Exponential backoff step, capped at `max`
pub fn next_delay(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current * 2, max)
}

/// How a connected streaming phase ended
enum StreamEnd {
    LimitReached,
    ServerClosed,
    Io(std::io::Error),
    Invalid(ValidationError),
}

/// Streams one station's readings to the server, reconnecting as needed
pub struct StationUplink<C: TransportConnector> {
    config: UplinkConfig,
    connector: C,
    generator: WeatherGenerator,
    events: Option<mpsc::Sender<UplinkEvent>>,
    sent: u64,
    last_timestamp_ms: u64,
}

impl<C: TransportConnector> StationUplink<C> {
    pub fn new(config: UplinkConfig, connector: C, generator: WeatherGenerator) -> Self {
        Self {
            config,
            connector,
            generator,
            events: None,
            sent: 0,
            last_timestamp_ms: 0,
        }
    }

    /// Report connection events on `tx`
    pub fn with_events(mut self, tx: mpsc::Sender<UplinkEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn station_id(&self) -> &str {
        self.generator.station_id()
    }

    /// Connect and stream readings until `max_readings` is reached
    ///
    /// Without a reading limit this only returns if the station cannot
    /// produce a valid reading. Returns the number of readings sent.
    pub async fn run(mut self) -> Result<u64, ValidationError> {
        let mut reconnect_delay = self.config.reconnect_delay;
        info!(
            station = %self.station_id(),
            profile = self.generator.profile().name,
            "Station starting"
        );

        loop {
            match timeout(self.config.connect_timeout, self.connector.connect()).await {
                Ok(Ok(stream)) => {
                    reconnect_delay = self.config.reconnect_delay;
                    info!(
                        station = %self.station_id(),
                        "Connected to {}",
                        self.connector.describe()
                    );
                    self.emit(UplinkEvent::Connected).await;

                    let reason = match self.stream_readings(stream).await {
                        StreamEnd::LimitReached => return Ok(self.sent),
                        StreamEnd::Invalid(e) => return Err(e),
                        StreamEnd::ServerClosed => "Server closed connection".to_string(),
                        StreamEnd::Io(e) => format!("I/O error: {}", e),
                    };
                    warn!(
                        station = %self.station_id(),
                        "Disconnected: {}; reconnecting in {:?}",
                        reason,
                        reconnect_delay
                    );
                    self.emit(UplinkEvent::Disconnected { reason }).await;
                }
                result => {
                    let reason = match result {
                        Ok(Err(e)) => format!("{:#}", e),
                        _ => format!("Timed out after {:?}", self.config.connect_timeout),
                    };
                    warn!(
                        station = %self.station_id(),
                        "Connection to {} failed: {}; retrying in {:?}",
                        self.connector.describe(),
                        reason,
                        reconnect_delay
                    );
                    self.emit(UplinkEvent::ConnectFailed {
                        reason,
                        retry_in: reconnect_delay,
                    })
                    .await;
                }
            }

            sleep(reconnect_delay).await;
            reconnect_delay = next_delay(reconnect_delay, self.config.max_reconnect_delay);
        }
    }

    /// Send readings on the interval until the limit is reached or the
    /// connection ends
    async fn stream_readings(&mut self, stream: C::Stream) -> StreamEnd {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut ticker = interval(self.config.send_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frame = BytesMut::with_capacity(128);
        let mut probe = [0u8; 64];

        loop {
            if self.limit_reached() {
                return match writer.shutdown().await {
                    Ok(()) => StreamEnd::LimitReached,
                    Err(e) => StreamEnd::Io(e),
                };
            }

            tokio::select! {
                _ = ticker.tick() => {
                    // Keep per-station timestamps strictly increasing
                    let timestamp_ms = now_ms().max(self.last_timestamp_ms + 1);
                    let reading = match self.generator.sample(timestamp_ms) {
                        Ok(reading) => reading,
                        Err(e) => return StreamEnd::Invalid(e),
                    };

                    frame.clear();
                    codec::encode_into(&reading, &mut frame);
                    if let Err(e) = writer.write_all(&frame).await {
                        return StreamEnd::Io(e);
                    }

                    self.last_timestamp_ms = timestamp_ms;
                    self.sent += 1;
                    debug!(
                        station = %self.station_id(),
                        "Sent {:.1}C {:.1}%",
                        reading.temperature(),
                        reading.humidity()
                    );
                    self.emit(UplinkEvent::Sent { timestamp_ms }).await;
                }

                // The server never writes; a read only completes on close
                result = reader.read(&mut probe) => match result {
                    Ok(0) => return StreamEnd::ServerClosed,
                    Ok(n) => debug!("Ignoring {} unexpected bytes from server", n),
                    Err(e) => return StreamEnd::Io(e),
                },
            }
        }
    }

    fn limit_reached(&self) -> bool {
        self.config.max_readings.is_some_and(|max| self.sent >= max)
    }

    async fn emit(&self, event: UplinkEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}
