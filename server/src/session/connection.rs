//! Individual station session handling

use super::manager::{SessionId, SessionManager};
use crate::registry::{Registry, UpsertOutcome};
use crate::stats::ServerStats;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weather_shared::codec::{CodecError, FrameDecoder};
use weather_shared::protocol::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MALFORMED_THRESHOLD};
use weather_shared::Reading;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no valid reading seen yet
    Connecting,
    /// Station id fixed by the first valid reading
    Identified,
    /// Terminal; the connection is being released
    Closing,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The station closed its end of the connection
    PeerClosed,
    /// Read failed (reset, broken pipe, ...)
    Io(std::io::ErrorKind),
    /// Nothing was received within the idle timeout
    IdleTimeout,
    /// Too many consecutive malformed frames
    TooManyMalformed,
    /// The server is stopping
    Shutdown,
}

/// Protocol violations counted against a session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Station id changed from {expected:?} to {got:?}")]
    StationMismatch { expected: String, got: String },
}

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub malformed_threshold: u32,
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            malformed_threshold: DEFAULT_MALFORMED_THRESHOLD,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

/// Server side of one station connection
pub struct StationSession<S> {
    id: SessionId,
    addr: SocketAddr,
    stream: S,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    state: SessionState,
    station_id: Option<String>,
    consecutive_malformed: u32,
    config: SessionConfig,
    registry: Arc<Registry>,
    stats: Arc<ServerStats>,
    sessions: Arc<SessionManager>,
}

impl<S> StationSession<S>
where
    S: AsyncRead + Unpin + Send,
{
    /// Create a new session around an accepted stream
    pub fn new(
        id: SessionId,
        addr: SocketAddr,
        stream: S,
        config: SessionConfig,
        registry: Arc<Registry>,
        stats: Arc<ServerStats>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            id,
            addr,
            stream,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
            state: SessionState::Connecting,
            station_id: None,
            consecutive_malformed: 0,
            config,
            registry,
            stats,
            sessions,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Station id (None until the first valid reading)
    pub fn station_id(&self) -> Option<&str> {
        self.station_id.as_deref()
    }

    /// Read and apply frames until the connection ends or `shutdown` fires
    ///
    /// Consumes the session; the stream is released when this returns.
    pub async fn run(mut self, shutdown: CancellationToken) -> CloseReason {
        debug!(session = self.id, peer = %self.addr, "Session started");

        let reason = loop {
            if let Some(reason) = self.drain_frames() {
                break reason;
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break CloseReason::Shutdown,

                result = timeout(self.config.idle_timeout, self.stream.read(&mut self.read_buf)) => {
                    match result {
                        Ok(Ok(0)) => break CloseReason::PeerClosed,
                        Ok(Ok(n)) => self.decoder.extend(&self.read_buf[..n]),
                        Ok(Err(e)) => {
                            warn!(session = self.id, peer = %self.addr, "Read error: {}", e);
                            break CloseReason::Io(e.kind());
                        }
                        Err(_) => {
                            warn!(
                                session = self.id,
                                peer = %self.addr,
                                "No data for {:?}, closing", self.config.idle_timeout
                            );
                            break CloseReason::IdleTimeout;
                        }
                    }
                }
            }
        };

        self.state = SessionState::Closing;
        info!(
            session = self.id,
            peer = %self.addr,
            station = self.station_id.as_deref().unwrap_or("-"),
            "Session closed: {:?}",
            reason
        );
        reason
    }

    /// Apply every complete frame currently buffered
    fn drain_frames(&mut self) -> Option<CloseReason> {
        loop {
            let frame = match self.decoder.decode_next() {
                Ok(Some(reading)) => Ok(reading),
                Ok(None) => return None,
                Err(e) => Err(SessionError::from(e)),
            };
            if let Some(reason) = self.handle_frame(frame) {
                return Some(reason);
            }
        }
    }

    fn handle_frame(&mut self, frame: Result<Reading, SessionError>) -> Option<CloseReason> {
        match frame.and_then(|reading| self.check_identity(&reading).map(|_| reading)) {
            Ok(reading) => {
                self.consecutive_malformed = 0;
                self.store(reading);
                None
            }
            Err(e) => self.record_malformed(e),
        }
    }

    /// Fix the station id on first contact, reject changes afterwards
    fn check_identity(&mut self, reading: &Reading) -> Result<(), SessionError> {
        match &self.station_id {
            Some(expected) if expected != reading.station_id() => {
                Err(SessionError::StationMismatch {
                    expected: expected.clone(),
                    got: reading.station_id().to_string(),
                })
            }
            Some(_) => Ok(()),
            None => {
                let station_id = reading.station_id().to_string();
                info!(
                    session = self.id,
                    peer = %self.addr,
                    station = %station_id,
                    location = reading.location(),
                    "Station identified"
                );
                self.sessions.identify(self.id, &station_id);
                self.station_id = Some(station_id);
                self.state = SessionState::Identified;
                Ok(())
            }
        }
    }

    fn store(&mut self, reading: Reading) {
        let timestamp_ms = reading.timestamp_ms();
        let temperature = reading.temperature();
        let humidity = reading.humidity();

        match self.registry.upsert(reading) {
            UpsertOutcome::Accepted { sequence } => {
                self.stats.reading_accepted();
                debug!(
                    session = self.id,
                    station = self.station_id.as_deref().unwrap_or("-"),
                    sequence,
                    timestamp_ms,
                    temperature,
                    humidity,
                    "Reading stored"
                );
            }
            UpsertOutcome::Stale { latest_ms } => {
                self.stats.reading_stale();
                debug!(
                    session = self.id,
                    station = self.station_id.as_deref().unwrap_or("-"),
                    timestamp_ms,
                    latest_ms,
                    "Stale reading dropped"
                );
            }
        }
    }

    fn record_malformed(&mut self, error: SessionError) -> Option<CloseReason> {
        self.consecutive_malformed += 1;
        self.stats.frame_malformed();
        warn!(
            session = self.id,
            peer = %self.addr,
            consecutive = self.consecutive_malformed,
            threshold = self.config.malformed_threshold,
            "Malformed frame: {}",
            error
        );

        (self.consecutive_malformed >= self.config.malformed_threshold)
            .then_some(CloseReason::TooManyMalformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionGuard;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadBuf};

    /// Yields `data` once, then fails every read with `error`
    struct FailingStream {
        data: Option<Vec<u8>>,
        error: io::ErrorKind,
    }

    impl AsyncRead for FailingStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::from(self.error))),
            }
        }
    }

    struct Fixture {
        registry: Arc<Registry>,
        stats: Arc<ServerStats>,
        sessions: Arc<SessionManager>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: Arc::new(Registry::new()),
                stats: Arc::new(ServerStats::new()),
                sessions: Arc::new(SessionManager::new()),
            }
        }

        fn session(&self, config: SessionConfig) -> (DuplexStream, StationSession<DuplexStream>) {
            let (client, server) = duplex(1024);
            let addr: SocketAddr = "127.0.0.1:50000".parse().expect("addr");
            let id = self.sessions.next_id();
            self.sessions.register(id, addr);
            let session = StationSession::new(
                id,
                addr,
                server,
                config,
                Arc::clone(&self.registry),
                Arc::clone(&self.stats),
                Arc::clone(&self.sessions),
            );
            (client, session)
        }
    }

    fn reading(station: &str, ts_secs: u64) -> Reading {
        Reading::new(station, ts_secs * 1000, 20.0, 50.0, None).expect("valid reading")
    }

    #[test]
    fn test_first_reading_identifies() {
        let fx = Fixture::new();
        let (_client, mut session) = fx.session(SessionConfig::default());
        assert_eq!(session.state(), SessionState::Connecting);

        assert_eq!(session.handle_frame(Ok(reading("stationA", 1))), None);
        assert_eq!(session.state(), SessionState::Identified);
        assert_eq!(session.station_id(), Some("stationA"));
        assert_eq!(fx.sessions.connected_stations(), vec!["stationA".to_string()]);
        assert!(fx.registry.get("stationA").is_some());
    }

    #[test]
    fn test_station_change_is_counted_and_dropped() {
        let fx = Fixture::new();
        let (_client, mut session) = fx.session(SessionConfig::default());

        session.handle_frame(Ok(reading("stationA", 1)));
        assert_eq!(session.handle_frame(Ok(reading("stationB", 2))), None);

        assert_eq!(session.station_id(), Some("stationA"));
        assert!(fx.registry.get("stationB").is_none());
        assert_eq!(fx.stats.snapshot().frames_malformed, 1);
    }

    #[test]
    fn test_valid_frame_resets_malformed_count() {
        let fx = Fixture::new();
        let (_client, mut session) = fx.session(SessionConfig::default());
        let bad = || Err(SessionError::from(CodecError::FieldCount(1)));

        assert_eq!(session.handle_frame(bad()), None);
        assert_eq!(session.handle_frame(bad()), None);
        assert_eq!(session.handle_frame(Ok(reading("stationA", 1))), None);
        assert_eq!(session.handle_frame(bad()), None);
        assert_eq!(session.handle_frame(bad()), None);
        assert_eq!(
            session.handle_frame(bad()),
            Some(CloseReason::TooManyMalformed)
        );
    }

    #[test]
    fn test_stale_reading_is_not_malformed() {
        let fx = Fixture::new();
        let (_client, mut session) = fx.session(SessionConfig::default());

        session.handle_frame(Ok(reading("stationA", 60)));
        assert_eq!(session.handle_frame(Ok(reading("stationA", 0))), None);

        let stats = fx.stats.snapshot();
        assert_eq!(stats.readings_accepted, 1);
        assert_eq!(stats.readings_stale, 1);
        assert_eq!(stats.frames_malformed, 0);
    }

    #[tokio::test]
    async fn test_three_malformed_frames_close_session() {
        let fx = Fixture::new();
        let (mut client, session) = fx.session(SessionConfig::default());

        client
            .write_all(b"hello\nstationA,soon,20,50\nstationA,1,20,500\n")
            .await
            .expect("write");

        let reason = session.run(CancellationToken::new()).await;
        assert_eq!(reason, CloseReason::TooManyMalformed);
        assert!(fx.registry.is_empty());
        assert_eq!(fx.stats.snapshot().frames_malformed, 3);
    }

    #[tokio::test]
    async fn test_fragmented_frames_then_peer_close() {
        let fx = Fixture::new();
        let (mut client, session) = fx.session(SessionConfig::default());
        let task = tokio::spawn(session.run(CancellationToken::new()));

        let chunks: [&[u8]; 3] = [
            b"stationA,17000",
            b"00000,21.5,60\nstat",
            b"ionA,1700000060,22.0,58\n",
        ];
        for chunk in chunks {
            client.write_all(chunk).await.expect("write");
            tokio::task::yield_now().await;
        }
        drop(client);

        assert_eq!(task.await.expect("join"), CloseReason::PeerClosed);
        let latest = fx.registry.get("stationA").expect("stored");
        assert_eq!(latest.temperature(), 22.0);
        assert_eq!(fx.registry.sequence("stationA"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_session() {
        let fx = Fixture::new();
        let config = SessionConfig {
            idle_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let (_client, session) = fx.session(config);

        assert_eq!(
            session.run(CancellationToken::new()).await,
            CloseReason::IdleTimeout
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let fx = Fixture::new();
        let (mut client, session) = fx.session(SessionConfig::default());
        let token = CancellationToken::new();
        let task = tokio::spawn(session.run(token.clone()));

        client
            .write_all(b"stationA,1700000000,21.5,60\n")
            .await
            .expect("write");
        token.cancel();

        assert_eq!(task.await.expect("join"), CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn test_read_error_closes_session_and_keeps_reading() {
        let fx = Fixture::new();
        let addr: SocketAddr = "127.0.0.1:50001".parse().expect("addr");
        let id = fx.sessions.next_id();
        fx.sessions.register(id, addr);
        let stream = FailingStream {
            data: Some(b"stationA,1700000000,21.5,60\n".to_vec()),
            error: io::ErrorKind::ConnectionReset,
        };
        let session = StationSession::new(
            id,
            addr,
            stream,
            SessionConfig::default(),
            Arc::clone(&fx.registry),
            Arc::clone(&fx.stats),
            Arc::clone(&fx.sessions),
        );
        assert_eq!(session.id(), id);

        let guard = SessionGuard::new(session.id(), Arc::clone(&fx.sessions), Arc::clone(&fx.stats));
        let reason = tokio::spawn(async move {
            let _guard = guard;
            session.run(CancellationToken::new()).await
        })
        .await
        .expect("join");

        assert_eq!(reason, CloseReason::Io(io::ErrorKind::ConnectionReset));
        let stored = fx.registry.get("stationA").expect("kept after close");
        assert_eq!(stored.temperature(), 21.5);
        assert_eq!(fx.sessions.count(), 0);
        assert!(fx.sessions.get_info(id).is_none());
        assert_eq!(fx.stats.snapshot().sessions_closed, 1);
    }
}
